//! Concrete AWS adapter implementations. Each adapter owns an SDK client
//! plus a handle to the shared tokio runtime and bridges the async SDK with
//! `block_on`; the pipeline itself stays synchronous and sequential.

pub mod ci_stack;
pub mod identity;
pub mod object_store;
pub mod record_store;
pub mod secrets;

use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::ProvideCredentials;
use tokio::runtime::Handle;

/// Shared AWS clients for one CLI invocation.
#[derive(Clone)]
pub struct AwsClients {
    pub handle: Handle,
    pub config: aws_config::SdkConfig,
    pub s3: aws_sdk_s3::Client,
    pub dynamodb: aws_sdk_dynamodb::Client,
    pub cognito: aws_sdk_cognitoidentityprovider::Client,
    pub kms: aws_sdk_kms::Client,
    pub cloudformation: aws_sdk_cloudformation::Client,
    pub iam: aws_sdk_iam::Client,
}

impl AwsClients {
    pub fn new(handle: Handle, region: &str) -> Self {
        let config = handle.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()))
                .load(),
        );

        Self {
            handle,
            s3: aws_sdk_s3::Client::new(&config),
            dynamodb: aws_sdk_dynamodb::Client::new(&config),
            cognito: aws_sdk_cognitoidentityprovider::Client::new(&config),
            kms: aws_sdk_kms::Client::new(&config),
            cloudformation: aws_sdk_cloudformation::Client::new(&config),
            iam: aws_sdk_iam::Client::new(&config),
            config,
        }
    }

    /// Resolve the operator's frozen credentials, to be sealed with KMS and
    /// handed to the deployment workflow.
    pub fn operator_credentials(&self) -> Result<(String, String), String> {
        let provider = self
            .config
            .credentials_provider()
            .ok_or_else(|| "no AWS credentials provider is configured".to_string())?;

        let credentials = self
            .handle
            .block_on(provider.provide_credentials())
            .map_err(|error| format!("failed to resolve AWS credentials: {error}"))?;

        Ok((
            credentials.access_key_id().to_string(),
            credentials.secret_access_key().to_string(),
        ))
    }
}
