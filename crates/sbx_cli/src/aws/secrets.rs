use aws_sdk_kms::primitives::Blob;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use tokio::runtime::Handle;

/// Operator credentials shipped to the deployment workflow, sealed with the
/// infrastructure KMS key and base64-encoded for transport.
#[derive(Serialize)]
pub struct OperatorCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub github_api_token: String,
}

pub struct SecretsEncryptor {
    client: aws_sdk_kms::Client,
    handle: Handle,
}

impl SecretsEncryptor {
    pub fn new(client: aws_sdk_kms::Client, handle: Handle) -> Self {
        Self { client, handle }
    }

    pub fn encrypt_credentials(
        &self,
        key_id: &str,
        credentials: &OperatorCredentials,
    ) -> Result<String, String> {
        let plaintext = serde_json::to_vec(credentials)
            .map_err(|error| format!("failed to serialize credentials: {error}"))?;

        let client = self.client.clone();
        let key_id = key_id.to_string();

        let ciphertext = self.handle.block_on(async move {
            let response = client
                .encrypt()
                .key_id(&key_id)
                .plaintext(Blob::new(plaintext))
                .send()
                .await
                .map_err(|error| format!("failed to encrypt credentials: {error}"))?;
            response
                .ciphertext_blob()
                .map(|blob| blob.as_ref().to_vec())
                .ok_or_else(|| "encryption returned no ciphertext".to_string())
        })?;

        Ok(BASE64.encode(ciphertext))
    }
}
