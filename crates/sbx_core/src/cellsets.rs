use serde_json::Value;
use thiserror::Error;

use crate::naming::prefixed;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellSetsError {
    #[error("cell-sets document is malformed: {0}")]
    Malformed(&'static str),
}

/// Rewrite a cell-sets document for the sandbox copy: every child key under
/// a root node tagged `"sample"` becomes `{sandbox_id}-{key}`. Non-sample
/// roots (louvain clusters, scratchpad, ...) are left untouched. The
/// document is transformed in place so unrelated fields keep their original
/// order when reserialized.
pub fn prefix_sample_keys(sandbox_id: &str, document: &mut Value) -> Result<(), CellSetsError> {
    let roots = document
        .get_mut("cellSets")
        .and_then(Value::as_array_mut)
        .ok_or(CellSetsError::Malformed("missing 'cellSets' array"))?;

    for root in roots {
        if root.get("key").and_then(Value::as_str) != Some("sample") {
            continue;
        }

        let children = root
            .get_mut("children")
            .and_then(Value::as_array_mut)
            .ok_or(CellSetsError::Malformed(
                "sample root is missing 'children' array",
            ))?;

        for child in children {
            let key = child
                .get("key")
                .and_then(Value::as_str)
                .ok_or(CellSetsError::Malformed("sample child is missing 'key'"))?;
            let new_key = prefixed(sandbox_id, key);
            child["key"] = Value::String(new_key);
        }
    }

    Ok(())
}
