use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

pub const MAX_SANDBOX_ID_LEN: usize = 26;

/// Deployment environments a copy can originate from or target. The
/// environment name doubles as the substring that distinguishes bucket and
/// table names across environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            _ => Err(ValidationError::new(format!(
                "Unknown environment '{raw}' (expected development, staging, or production)"
            ))),
        }
    }
}

/// Roles a source bucket can play in the copy pipeline, derived from the
/// bucket naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketRole {
    /// Keys start with an experiment ID; plain server-side copy.
    General,
    /// Originals buckets use a `projectId/sampleId/file` key schema, so the
    /// second path segment is prefixed too.
    Originals,
    /// Holds JSON cell-sets documents whose sample keys are rewritten on copy.
    CellSets,
}

impl BucketRole {
    pub fn from_name(bucket: &str) -> Self {
        if bucket.contains("originals") {
            Self::Originals
        } else if bucket.contains("cell-sets") {
            Self::CellSets
        } else {
            Self::General
        }
    }
}

/// Every copied identifier is namespaced as `{sandbox_id}-{original_id}`,
/// which is what makes bulk teardown by prefix match possible.
pub fn prefixed(sandbox_id: &str, id: &str) -> String {
    format!("{sandbox_id}-{id}")
}

/// Map a bucket or table name across environments by substituting the
/// environment substring, e.g. `biodata-production` -> `biodata-staging`.
pub fn map_environment(name: &str, origin: Environment, destination: Environment) -> String {
    name.replace(origin.as_str(), destination.as_str())
}

/// Rewrite an object key for the sandbox copy. The leading path segment is
/// the owning entity ID and every occurrence of it in the key is prefixed;
/// originals buckets additionally prefix the sample ID in the second segment.
pub fn remap_object_key(key: &str, sandbox_id: &str, role: BucketRole) -> String {
    let mut segments = key.split('/');
    let Some(owner_id) = segments.next().filter(|segment| !segment.is_empty()) else {
        return key.to_string();
    };

    let mut target_key = key.replace(owner_id, &prefixed(sandbox_id, owner_id));
    if role == BucketRole::Originals {
        if let Some(sample_id) = segments.next().filter(|segment| !segment.is_empty()) {
            target_key = target_key.replace(sample_id, &prefixed(sandbox_id, sample_id));
        }
    }

    target_key
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a sandbox ID: at most 26 characters, dot-separated labels of
/// lowercase alphanumerics and dashes, each label starting and ending with
/// an alphanumeric.
pub fn validate_sandbox_id(sandbox_id: &str) -> Result<(), ValidationError> {
    if sandbox_id.is_empty() {
        return Err(ValidationError::new("sandbox ID cannot be empty"));
    }
    if sandbox_id.len() > MAX_SANDBOX_ID_LEN {
        return Err(ValidationError::new(format!(
            "sandbox ID must be at most {MAX_SANDBOX_ID_LEN} characters long"
        )));
    }

    for label in sandbox_id.split('.') {
        let valid = !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && label.starts_with(|c: char| c.is_ascii_alphanumeric())
            && label.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !valid {
            return Err(ValidationError::new(format!(
                "sandbox ID '{sandbox_id}' must consist of lowercase alphanumeric labels \
                 (dashes allowed inside), separated by dots"
            )));
        }
    }

    Ok(())
}

/// Hex SHA-256 fingerprint of a deployment manifest.
pub fn manifest_fingerprint(manifest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derive a default sandbox ID from the operator nickname plus either the
/// pinned ref fragments (e.g. `api22-ui14`) or, when everything tracks the
/// default branch, a truncated fingerprint of the manifest contents.
pub fn default_sandbox_id(nickname: &str, ref_fragments: &[String], manifest: &str) -> String {
    let nick: String = nickname
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    let unique = if ref_fragments.is_empty() {
        manifest_fingerprint(manifest)[..12].to_string()
    } else {
        ref_fragments.join("-")
    };

    let mut sandbox_id = [nick, unique]
        .iter()
        .filter(|fragment| !fragment.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    sandbox_id.truncate(MAX_SANDBOX_ID_LEN);

    sandbox_id.trim_end_matches(&['-', '.'][..]).to_string()
}
