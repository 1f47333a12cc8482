use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use sbx_pipeline::adapters::{ObjectStore, StoredObject};
use tokio::runtime::Handle;

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    handle: Handle,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, handle: Handle) -> Self {
        Self { client, handle }
    }
}

impl ObjectStore for S3ObjectStore {
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>, String> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        self.handle.block_on(async move {
            let mut listed = Vec::new();
            let mut continuation: Option<String> = None;

            loop {
                let mut request = client.list_objects_v2().bucket(&bucket).prefix(&prefix);
                if let Some(token) = &continuation {
                    request = request.continuation_token(token);
                }
                let response = request
                    .send()
                    .await
                    .map_err(|error| format!("failed to list {bucket}/{prefix}: {error}"))?;

                listed.extend(response.contents().iter().filter_map(|object| {
                    Some(StoredObject {
                        key: object.key()?.to_string(),
                        etag: object.e_tag()?.to_string(),
                    })
                }));

                match response.next_continuation_token() {
                    Some(token) if response.is_truncated() == Some(true) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }

            Ok(listed)
        })
    }

    fn head_matches(&self, bucket: &str, key: &str, etag: &str) -> Result<bool, String> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        let etag = etag.to_string();

        // every failure path is a non-match; the caller copies on false
        self.handle.block_on(async move {
            Ok(client
                .head_object()
                .bucket(bucket)
                .key(key)
                .if_match(etag)
                .send()
                .await
                .is_ok())
        })
    }

    fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<(), String> {
        let client = self.client.clone();
        let copy_source = format!("{source_bucket}/{source_key}");
        let target_bucket = target_bucket.to_string();
        let target_key = target_key.to_string();

        self.handle.block_on(async move {
            client
                .copy_object()
                .copy_source(&copy_source)
                .bucket(&target_bucket)
                .key(&target_key)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| {
                    format!("failed to copy {copy_source} to {target_bucket}/{target_key}: {error}")
                })
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();

        self.handle.block_on(async move {
            let response = client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|error| format!("failed to get {bucket}/{key}: {error}"))?;
            let body = response
                .body
                .collect()
                .await
                .map_err(|error| format!("failed to read body of {bucket}/{key}: {error}"))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        let body = body.to_vec();

        self.handle.block_on(async move {
            client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(ByteStream::from(body))
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to write {bucket}/{key}: {error}"))
        })
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), String> {
        let client = self.client.clone();
        let bucket = bucket.to_string();

        let identifiers = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|error| format!("invalid object key '{key}': {error}"))
            })
            .collect::<Result<Vec<_>, String>>()?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .map_err(|error| format!("failed to build delete request: {error}"))?;

        self.handle.block_on(async move {
            client
                .delete_objects()
                .bucket(&bucket)
                .delete(delete)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to delete objects from {bucket}: {error}"))
        })
    }

    fn list_buckets(&self) -> Result<Vec<String>, String> {
        let client = self.client.clone();

        self.handle.block_on(async move {
            let response = client
                .list_buckets()
                .send()
                .await
                .map_err(|error| format!("failed to list buckets: {error}"))?;
            Ok(response
                .buckets()
                .iter()
                .filter_map(|bucket| bucket.name().map(str::to_string))
                .collect())
        })
    }
}
