use std::path::Path;

use clap::Args;
use sbx_pipeline::teardown::remove_staged_resources;
use sbx_pipeline::SandboxConfig;
use serde_json::json;
use tokio::runtime::Handle;

use crate::aws::object_store::S3ObjectStore;
use crate::aws::record_store::DynamoRecordStore;
use crate::aws::secrets::{OperatorCredentials, SecretsEncryptor};
use crate::aws::AwsClients;
use crate::commands::{progress_spinner, render_teardown_event, report_failures};
use crate::github::GitHubClient;
use crate::term;

const REMOVE_WORKFLOW: &str = "Remove a staging environment";

#[derive(Args)]
pub struct UnstageArgs {
    /// Sandbox to remove
    pub sandbox_id: String,
    /// A personal access token with the required permissions
    #[arg(short = 't', long, env = "GITHUB_API_TOKEN")]
    pub token: String,
    /// The organization to perform the operation in
    #[arg(long, env = "GITHUB_ORG")]
    pub org: Option<String>,
    /// Confirm the removal; it cannot be undone
    #[arg(long)]
    pub yes: bool,
}

pub fn run(args: UnstageArgs, config_path: &Path, handle: &Handle) -> Result<(), String> {
    let config = SandboxConfig::load(config_path).map_err(|error| error.to_string())?;
    let org = args
        .org
        .clone()
        .or_else(|| config.github_org.clone())
        .ok_or_else(|| "github-org must be configured".to_string())?;

    if !args.yes {
        return Err(format!(
            "removing sandbox '{}' cannot be undone; pass --yes to confirm",
            args.sandbox_id
        ));
    }

    let aws = AwsClients::new(handle.clone(), &config.region);
    let github = GitHubClient::new(&args.token);

    if github.manifest_exists(&org, &config.iac_repository, &args.sandbox_id) {
        term::step("Dispatching environment removal");
        let (access_key, secret_key) = aws.operator_credentials()?;
        let secrets = SecretsEncryptor::new(aws.kms.clone(), aws.handle.clone())
            .encrypt_credentials(
                &config.kms_key_alias,
                &OperatorCredentials {
                    access_key,
                    secret_key,
                    github_api_token: args.token.clone(),
                },
            )?;

        github.dispatch_workflow(
            &org,
            &config.iac_repository,
            REMOVE_WORKFLOW,
            "master",
            json!({"sandbox-id": args.sandbox_id, "secrets": secrets}),
        )?;
        term::success(&format!(
            "Removal submitted. You can check your progress at \
             https://github.com/{org}/{}/actions",
            config.iac_repository
        ));
    } else {
        term::warn(&format!(
            "Staging sandbox with ID '{}' could not be found. \
             Proceeding with the removal of staged resources.",
            args.sandbox_id
        ));
    }

    term::step("Deleting staged resources");
    let objects = S3ObjectStore::new(aws.s3.clone(), aws.handle.clone());
    let records = DynamoRecordStore::new(aws.dynamodb.clone(), aws.handle.clone());

    let spinner = progress_spinner();
    let report = remove_staged_resources(&objects, &records, &config, &args.sandbox_id, &mut |event| {
        render_teardown_event(&spinner, &event)
    })
    .map_err(|error| error.to_string())?;
    spinner.finish_and_clear();

    term::success(&format!(
        "{} record(s) and {} object(s) removed.",
        report.deleted_records, report.deleted_objects
    ));
    report_failures(&report.failures);
    Ok(())
}
