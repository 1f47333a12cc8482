use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::record::{string_at, AttrValue, Item};

/// Placeholder recorded for samples that carry no value for a declared
/// metadata key.
pub const DEFAULT_METADATA_VALUE: &str = "N.A.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsHashError {
    #[error("record is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("sample '{0}' is missing required field '{1}'")]
    MalformedSample(String, &'static str),
}

/// Canonical parameter object for the downstream processing pipeline. Field
/// order is part of the contract: the serialized form must be byte-for-byte
/// reproducible so the digest can serve as an idempotency token.
#[derive(Serialize)]
struct PipelineTaskParams<'a> {
    #[serde(rename = "projectId")]
    project_id: &'a str,
    #[serde(rename = "experimentName")]
    experiment_name: &'a str,
    organism: Option<&'a str>,
    input: InputSection<'a>,
    #[serde(rename = "sampleIds")]
    sample_ids: Vec<&'a str>,
    #[serde(rename = "sampleNames")]
    sample_names: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Map<String, Value>>,
}

#[derive(Serialize)]
struct InputSection<'a> {
    #[serde(rename = "type")]
    input_type: &'a str,
}

/// Compute the processing-pipeline parameter hash for a copied experiment.
///
/// `experiment` is the experiment record, `project` the `projects` map of
/// the project record, and `samples` the `samples` map of the
/// sample-collection record. The digest is SHA-1 over the compact canonical
/// JSON; given identical records the result is identical regardless of map
/// insertion order (the envelope model sorts its maps).
pub fn pipeline_params_hash(
    experiment: &Item,
    project: &BTreeMap<String, AttrValue>,
    samples: &BTreeMap<String, AttrValue>,
) -> Result<String, ParamsHashError> {
    let project_id = experiment
        .get("projectId")
        .and_then(AttrValue::as_s)
        .ok_or(ParamsHashError::MissingField("projectId"))?;
    let experiment_name = experiment
        .get("experimentName")
        .and_then(AttrValue::as_s)
        .ok_or(ParamsHashError::MissingField("experimentName"))?;
    let input_type = string_at(experiment, &["meta", "type"])
        .ok_or(ParamsHashError::MissingField("meta.type"))?;
    let organism = string_at(experiment, &["meta", "organism"]).filter(|value| !value.is_empty());

    let sample_ids: Vec<&str> = samples.keys().map(String::as_str).collect();
    let mut sample_names = Vec::with_capacity(sample_ids.len());
    for (sample_id, sample) in samples {
        let name = sample
            .as_m()
            .and_then(|map| map.get("name"))
            .and_then(AttrValue::as_s)
            .ok_or_else(|| ParamsHashError::MalformedSample(sample_id.clone(), "name"))?;
        sample_names.push(name);
    }

    let params = PipelineTaskParams {
        project_id,
        experiment_name,
        organism,
        input: InputSection { input_type },
        sample_ids,
        sample_names,
        metadata: metadata_values(project, samples),
    };

    let canonical =
        serde_json::to_string(&params).expect("canonical parameter object should serialize");

    let mut hasher = Sha1::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// One list of per-sample values for every metadata key the project
/// declares, in declared order, with a placeholder for samples missing the
/// key. Absent entirely when the project declares no keys.
fn metadata_values(
    project: &BTreeMap<String, AttrValue>,
    samples: &BTreeMap<String, AttrValue>,
) -> Option<Map<String, Value>> {
    let declared = project.get("metadataKeys").and_then(AttrValue::as_l)?;
    if declared.is_empty() {
        return None;
    }

    let mut values = Map::new();
    for key in declared {
        let key = key.as_s()?;
        let sanitized = key.replace('-', "_");

        let per_sample: Vec<Value> = samples
            .values()
            .map(|sample| {
                sample
                    .as_m()
                    .and_then(|map| string_at(map, &["metadata", key]))
                    .unwrap_or(DEFAULT_METADATA_VALUE)
            })
            .map(|value| Value::String(value.to_string()))
            .collect();

        values.insert(sanitized, Value::Array(per_sample));
    }

    Some(values)
}
