use sbx_pipeline::adapters::IdentityProvider;
use tokio::runtime::Handle;

/// Resolves platform usernames from the Cognito user pool backing the
/// destination environment.
pub struct CognitoIdentity {
    client: aws_sdk_cognitoidentityprovider::Client,
    handle: Handle,
    user_pool_id: String,
}

impl CognitoIdentity {
    pub fn new(
        client: aws_sdk_cognitoidentityprovider::Client,
        handle: Handle,
        user_pool_id: String,
    ) -> Self {
        Self {
            client,
            handle,
            user_pool_id,
        }
    }
}

impl IdentityProvider for CognitoIdentity {
    fn username_for_email(&self, email: &str) -> Result<String, String> {
        let client = self.client.clone();
        let user_pool_id = self.user_pool_id.clone();
        let email = email.to_string();

        self.handle.block_on(async move {
            let response = client
                .admin_get_user()
                .user_pool_id(&user_pool_id)
                .username(&email)
                .send()
                .await
                .map_err(|error| format!("failed to look up user for {email}: {error}"))?;
            Ok(response.username().to_string())
        })
    }
}
