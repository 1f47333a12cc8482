use sbx_core::record::{AttrValue, Item};

/// Experiment listing entry used by `experiment ls` and the stage flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSummary {
    pub id: String,
    pub name: String,
}

/// Seam to the structured table service. Records cross this boundary in the
/// tagged-envelope model so the wire shape survives round trips exactly.
pub trait RecordStore {
    /// All records whose partition key equals `experiment_id`.
    fn query_by_experiment(&self, table: &str, experiment_id: &str) -> Result<Vec<Item>, String>;

    fn get_item(&self, table: &str, key_attr: &str, key: &str) -> Result<Option<Item>, String>;

    fn put_item(&self, table: &str, item: &Item) -> Result<(), String>;

    fn batch_put(&self, table: &str, items: &[Item]) -> Result<(), String>;

    /// Overwrite the processing-pipeline parameter hash on one experiment
    /// record.
    fn update_params_hash(
        &self,
        table: &str,
        experiment_id: &str,
        hash: &str,
    ) -> Result<(), String>;

    /// Paginated scan of experiment IDs and names.
    fn scan_experiment_summaries(&self, table: &str) -> Result<Vec<ExperimentSummary>, String>;

    /// Experiment IDs whose partition key begins with `prefix`.
    fn scan_experiment_ids_with_prefix(
        &self,
        table: &str,
        prefix: &str,
    ) -> Result<Vec<String>, String>;

    fn list_tables(&self) -> Result<Vec<String>, String>;

    /// Name of the table's sort-key attribute, if its key schema is
    /// composite.
    fn sort_key(&self, table: &str) -> Result<Option<String>, String>;

    /// Sort-key values of every record under `experiment_id`, for composite
    /// key deletes.
    fn query_item_sort_keys(
        &self,
        table: &str,
        experiment_id: &str,
        sort_key: &str,
    ) -> Result<Vec<AttrValue>, String>;

    fn delete_item(&self, table: &str, key: &Item) -> Result<(), String>;
}
