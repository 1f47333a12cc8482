/// One listed storage object: its key plus the entity tag used as a cheap
/// equality heuristic by the differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub etag: String,
}

/// Seam to the object-storage service. Implementations are expected to be
/// blocking; the pipeline issues calls strictly sequentially.
pub trait ObjectStore {
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>, String>;

    /// Conditional head request: does the object at `bucket`/`key` exist
    /// with exactly this entity tag? Implementations must only return
    /// `Ok(true)` on a confirmed match; "not found" is `Ok(false)`.
    fn head_matches(&self, bucket: &str, key: &str, etag: &str) -> Result<bool, String>;

    fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<(), String>;

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String>;

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String>;

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), String>;

    fn list_buckets(&self) -> Result<Vec<String>, String>;
}
