use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use aws_sdk_cloudformation::types::Capability;
use serde_json::{json, Value};
use tokio::runtime::Handle;

const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Stack/user naming for a GitHub organization. The default organization
/// keeps the short historical names; any other org gets suffixed ones so
/// multiple orgs can share an AWS account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiNames {
    pub stack_name: String,
    pub path_prefix: String,
    pub name_prefix: String,
}

impl CiNames {
    pub fn for_org(org: &str, default_org: &str) -> Self {
        if org == default_org {
            Self {
                stack_name: "ci-users".to_string(),
                path_prefix: "ci-users".to_string(),
                name_prefix: "ci-user".to_string(),
            }
        } else {
            Self {
                stack_name: format!("ci-users-{org}"),
                path_prefix: format!("ci-users/{org}"),
                name_prefix: format!("ci-user-{org}"),
            }
        }
    }

    pub fn username(&self, repo: &str) -> String {
        format!("{}-{repo}", self.name_prefix)
    }
}

/// Stack resource names cannot contain underscores or dashes: strip them
/// and capitalize the words instead.
pub fn format_name_for_stack(repo_name: &str) -> String {
    repo_name
        .split(['-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcome {
    Applied,
    UpToDate,
}

/// Manages the CloudFormation stack holding the CI IAM users, plus the
/// access keys minted for them.
pub struct CiUserStack {
    cloudformation: aws_sdk_cloudformation::Client,
    iam: aws_sdk_iam::Client,
    handle: Handle,
}

impl CiUserStack {
    pub fn new(
        cloudformation: aws_sdk_cloudformation::Client,
        iam: aws_sdk_iam::Client,
        handle: Handle,
    ) -> Self {
        Self {
            cloudformation,
            iam,
            handle,
        }
    }

    /// Create or update the CI users stack for the given per-repository
    /// policies, then wait until the stack settles.
    pub fn apply(
        &self,
        names: &CiNames,
        policies: &BTreeMap<String, Value>,
    ) -> Result<StackOutcome, String> {
        let template = user_stack_template(names, policies);
        let body = serde_yaml::to_string(&template)
            .map_err(|error| format!("failed to render stack template: {error}"))?;

        let client = self.cloudformation.clone();
        let stack_name = names.stack_name.clone();
        let template_body = body.clone();

        let created: Result<(), String> = self.handle.block_on(async {
            client
                .create_stack()
                .stack_name(&stack_name)
                .template_body(&template_body)
                .capabilities(Capability::CapabilityIam)
                .capabilities(Capability::CapabilityNamedIam)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("{error}"))
        });

        match created {
            Ok(()) => {}
            Err(message) if message.contains("AlreadyExists") => {
                let client = self.cloudformation.clone();
                let stack_name = names.stack_name.clone();
                let updated: Result<(), String> = self.handle.block_on(async {
                    client
                        .update_stack()
                        .stack_name(&stack_name)
                        .template_body(&body)
                        .capabilities(Capability::CapabilityIam)
                        .capabilities(Capability::CapabilityNamedIam)
                        .send()
                        .await
                        .map(|_| ())
                        .map_err(|error| format!("{error}"))
                });

                match updated {
                    Ok(()) => {}
                    Err(message) if message.contains("No updates are to be performed") => {
                        return Ok(StackOutcome::UpToDate);
                    }
                    Err(message) => {
                        return Err(format!("failed to update CI users stack: {message}"))
                    }
                }
            }
            Err(message) => return Err(format!("failed to create CI users stack: {message}")),
        }

        self.wait_until_settled(&names.stack_name)?;
        Ok(StackOutcome::Applied)
    }

    fn wait_until_settled(&self, stack_name: &str) -> Result<(), String> {
        loop {
            thread::sleep(POLL_INTERVAL);

            let client = self.cloudformation.clone();
            let name = stack_name.to_string();
            let status: String = self.handle.block_on(async move {
                let response = client
                    .describe_stacks()
                    .stack_name(&name)
                    .send()
                    .await
                    .map_err(|error| format!("failed to describe stack {name}: {error}"))?;
                let stack = response
                    .stacks()
                    .first()
                    .ok_or_else(|| format!("stack {name} not found"))?;
                Ok::<String, String>(stack.stack_status().map(|s| s.as_str().to_string()).unwrap_or_default())
            })?;

            if status.contains("FAILED") || status.contains("ROLLBACK") || status.contains("DELETE")
            {
                return Err(format!("stack operation failed with status {status}"));
            }
            if status.contains("COMPLETE") {
                return Ok(());
            }
            eprint!(".");
        }
    }

    /// Mint a fresh access key for one CI user.
    pub fn create_access_key(&self, username: &str) -> Result<(String, String), String> {
        let client = self.iam.clone();
        let username = username.to_string();

        self.handle.block_on(async move {
            let response = client
                .create_access_key()
                .user_name(&username)
                .send()
                .await
                .map_err(|error| format!("failed to create access key for {username}: {error}"))?;
            let key = response
                .access_key()
                .ok_or_else(|| format!("no access key returned for {username}"))?;
            Ok((
                key.access_key_id().to_string(),
                key.secret_access_key().to_string(),
            ))
        })
    }

    pub fn delete_access_key(&self, username: &str, access_key_id: &str) -> Result<(), String> {
        let client = self.iam.clone();
        let username = username.to_string();
        let access_key_id = access_key_id.to_string();

        self.handle.block_on(async move {
            client
                .delete_access_key()
                .user_name(&username)
                .access_key_id(&access_key_id)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| format!("failed to delete access key for {username}: {error}"))
        })
    }

    /// Delete every access key of `username` except `keep`. Returns how many
    /// keys were removed.
    pub fn delete_other_keys(&self, username: &str, keep: &str) -> Result<usize, String> {
        let client = self.iam.clone();
        let owner = username.to_string();

        let key_ids: Vec<String> = self.handle.block_on(async {
            let response = client
                .list_access_keys()
                .user_name(&owner)
                .send()
                .await
                .map_err(|error| format!("failed to list access keys for {owner}: {error}"))?;
            Ok::<_, String>(
                response
                    .access_key_metadata()
                    .iter()
                    .filter_map(|metadata| metadata.access_key_id().map(str::to_string))
                    .collect(),
            )
        })?;

        let mut deleted = 0;
        for key_id in key_ids {
            if key_id == keep {
                continue;
            }
            self.delete_access_key(username, &key_id)?;
            deleted += 1;
        }

        Ok(deleted)
    }
}

fn user_stack_template(names: &CiNames, policies: &BTreeMap<String, Value>) -> Value {
    let mut resources = serde_json::Map::new();
    for (repo, repo_policies) in policies {
        resources.insert(
            format!("{}CIUser", format_name_for_stack(repo)),
            json!({
                "Type": "AWS::IAM::User",
                "Properties": {
                    "Path": format!("/{}/{repo}/", names.path_prefix),
                    "UserName": names.username(repo),
                    "Policies": repo_policies,
                }
            }),
        );
    }

    json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Description": "GitHub CI users with per-repository rights [managed by the sbx rotate-ci command]",
        "Resources": Value::Object(resources),
    })
}
