use std::collections::BTreeMap;

use thiserror::Error;

use crate::naming::prefixed;
use crate::record::{AttrValue, Item};

/// Roles the copy pipeline knows how to remap. The role is resolved once
/// from configuration when a table copy starts; tables with no role are an
/// explicit error rather than a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Experiments,
    Samples,
    Projects,
}

impl TableRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Experiments => "experiments",
            Self::Samples => "samples",
            Self::Projects => "projects",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemapError {
    #[error("no remapping rule is defined for table '{0}'")]
    UnknownTable(String),
    #[error("{role} record is missing or malformed at '{field}'")]
    Malformed { role: &'static str, field: String },
}

impl RemapError {
    fn malformed(role: TableRole, field: impl Into<String>) -> Self {
        Self::Malformed {
            role: role.as_str(),
            field: field.into(),
        }
    }
}

/// Rewrite one record for the sandbox copy.
///
/// Every identifier field that references an original entity comes back as
/// `{sandbox_id}-{original_id}`; all other attributes are carried over
/// unchanged. For experiment records, `grantee` (when present) is appended
/// to the record's write-access set so the invoking operator can use the
/// copy.
pub fn remap_item(
    role: TableRole,
    item: &Item,
    sandbox_id: &str,
    grantee: Option<&str>,
) -> Result<Item, RemapError> {
    match role {
        TableRole::Experiments => remap_experiment(item, sandbox_id, grantee),
        TableRole::Samples => remap_sample_collection(item, sandbox_id),
        TableRole::Projects => remap_project(item, sandbox_id),
    }
}

fn remap_experiment(
    item: &Item,
    sandbox_id: &str,
    grantee: Option<&str>,
) -> Result<Item, RemapError> {
    let mut out = item.clone();
    prefix_string_attr(&mut out, "experimentId", sandbox_id, TableRole::Experiments)?;
    prefix_string_attr(&mut out, "projectId", sandbox_id, TableRole::Experiments)?;

    if let Some(user) = grantee {
        grant_write_access(&mut out, user);
    }

    Ok(out)
}

fn remap_sample_collection(item: &Item, sandbox_id: &str) -> Result<Item, RemapError> {
    let role = TableRole::Samples;
    let mut out = item.clone();
    prefix_string_attr(&mut out, "experimentId", sandbox_id, role)?;
    prefix_string_attr(&mut out, "projectUuid", sandbox_id, role)?;

    let samples = out
        .get("samples")
        .and_then(AttrValue::as_m)
        .ok_or_else(|| RemapError::malformed(role, "samples"))?;

    let mut remapped = BTreeMap::new();
    for (sample_id, sample) in samples {
        let sample_map = sample
            .as_m()
            .ok_or_else(|| RemapError::malformed(role, format!("samples.{sample_id}")))?;
        let remapped_id = prefixed(sandbox_id, sample_id);

        let mut sample_out = sample_map.clone();
        sample_out.insert("uuid".to_string(), AttrValue::s(remapped_id.clone()));
        prefix_string_attr(&mut sample_out, "projectUuid", sandbox_id, role)?;
        remap_sample_files(&mut sample_out, sample_id, sandbox_id)?;

        remapped.insert(remapped_id, AttrValue::M(sample_out));
    }

    out.insert("samples".to_string(), AttrValue::M(remapped));
    Ok(out)
}

/// Prefix the storage path of every file entry except the bookkeeping
/// `lastModified` member, which is not a file.
fn remap_sample_files(
    sample: &mut BTreeMap<String, AttrValue>,
    sample_id: &str,
    sandbox_id: &str,
) -> Result<(), RemapError> {
    let role = TableRole::Samples;
    let files = sample
        .get_mut("files")
        .and_then(AttrValue::as_m_mut)
        .ok_or_else(|| RemapError::malformed(role, format!("samples.{sample_id}.files")))?;

    for (file_name, file) in files.iter_mut() {
        if file_name == "lastModified" {
            continue;
        }
        let file_map = file.as_m_mut().ok_or_else(|| {
            RemapError::malformed(role, format!("samples.{sample_id}.files.{file_name}"))
        })?;
        prefix_string_attr(file_map, "path", sandbox_id, role)?;
    }

    Ok(())
}

fn remap_project(item: &Item, sandbox_id: &str) -> Result<Item, RemapError> {
    let role = TableRole::Projects;
    let mut out = item.clone();

    let project_uuid = out
        .get("projectUuid")
        .and_then(AttrValue::as_s)
        .ok_or_else(|| RemapError::malformed(role, "projectUuid"))?
        .to_string();

    let projects = out
        .get_mut("projects")
        .and_then(AttrValue::as_m_mut)
        .ok_or_else(|| RemapError::malformed(role, "projects"))?;
    projects.insert(
        "uuid".to_string(),
        AttrValue::s(prefixed(sandbox_id, &project_uuid)),
    );

    for member_list in ["experiments", "samples"] {
        let entries = projects
            .get_mut(member_list)
            .and_then(AttrValue::as_l_mut)
            .ok_or_else(|| RemapError::malformed(role, format!("projects.{member_list}")))?;
        for entry in entries.iter_mut() {
            let id = entry
                .as_s()
                .ok_or_else(|| RemapError::malformed(role, format!("projects.{member_list}")))?;
            *entry = AttrValue::s(prefixed(sandbox_id, id));
        }
    }

    out.insert(
        "projectUuid".to_string(),
        AttrValue::s(prefixed(sandbox_id, &project_uuid)),
    );
    Ok(out)
}

fn prefix_string_attr(
    map: &mut BTreeMap<String, AttrValue>,
    attr: &str,
    sandbox_id: &str,
    role: TableRole,
) -> Result<(), RemapError> {
    let value = map
        .get(attr)
        .and_then(AttrValue::as_s)
        .ok_or_else(|| RemapError::malformed(role, attr))?;
    let replacement = AttrValue::s(prefixed(sandbox_id, value));
    map.insert(attr.to_string(), replacement);
    Ok(())
}

/// Append `user` to the first write-access string set found in the record,
/// searching nested maps depth-first. Returns whether a set was found.
fn grant_write_access(map: &mut BTreeMap<String, AttrValue>, user: &str) -> bool {
    if let Some(users) = map.get_mut("rbac_can_write").and_then(AttrValue::as_ss_mut) {
        if !users.iter().any(|existing| existing == user) {
            users.push(user.to_string());
        }
        return true;
    }

    for value in map.values_mut() {
        if let AttrValue::M(inner) = value {
            if grant_write_access(inner, user) {
                return true;
            }
        }
    }

    false
}
