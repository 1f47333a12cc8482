use std::path::Path;

use clap::{Args, Subcommand};
use sbx_core::naming::{validate_sandbox_id, Environment};
use sbx_pipeline::adapters::{IdentityProvider, RecordStore};
use sbx_pipeline::copy::{copy_experiments, CopyRequest};
use sbx_pipeline::SandboxConfig;
use tokio::runtime::Handle;

use crate::aws::identity::CognitoIdentity;
use crate::aws::object_store::S3ObjectStore;
use crate::aws::record_store::DynamoRecordStore;
use crate::aws::AwsClients;
use crate::commands::{progress_spinner, render_copy_event, report_failures};
use crate::term;

#[derive(Subcommand)]
pub enum ExperimentCommands {
    /// Copy experiments from one environment into another under a sandbox
    /// namespace
    Copy(CopyArgs),
    /// List the experiments available in an environment
    Ls(LsArgs),
}

#[derive(Args)]
pub struct CopyArgs {
    /// Experiment ID to copy (repeatable)
    #[arg(long = "experiment", required = true)]
    pub experiments: Vec<String>,
    /// Sandbox namespace for the copies
    #[arg(long)]
    pub sandbox_id: String,
    /// Environment to copy from
    #[arg(long, default_value = "production")]
    pub origin: Environment,
    /// Environment to copy into
    #[arg(long, default_value = "staging")]
    pub destination: Environment,
    /// Email used to log in to the platform; the copied experiments grant
    /// this account write access
    #[arg(long, env = "SBX_EMAIL")]
    pub email: String,
}

#[derive(Args)]
pub struct LsArgs {
    /// Environment to list
    #[arg(long, default_value = "production")]
    pub origin: Environment,
}

pub fn run(command: ExperimentCommands, config_path: &Path, handle: &Handle) -> Result<(), String> {
    let config = SandboxConfig::load(config_path).map_err(|error| error.to_string())?;

    match command {
        ExperimentCommands::Copy(args) => copy(args, &config, handle),
        ExperimentCommands::Ls(args) => ls(args, &config, handle),
    }
}

fn copy(args: CopyArgs, config: &SandboxConfig, handle: &Handle) -> Result<(), String> {
    validate_sandbox_id(&args.sandbox_id).map_err(|error| error.to_string())?;

    let aws = AwsClients::new(handle.clone(), &config.region);
    let grantee = resolve_grantee(&aws, config, &args.email)?;

    let objects = S3ObjectStore::new(aws.s3.clone(), aws.handle.clone());
    let records = DynamoRecordStore::new(aws.dynamodb.clone(), aws.handle.clone());

    let request = CopyRequest {
        experiments: args.experiments.clone(),
        sandbox_id: args.sandbox_id.clone(),
        origin: args.origin,
        destination: args.destination,
        grantee: Some(grantee),
    };

    term::step("Copying experiments");
    let spinner = progress_spinner();
    let report = copy_experiments(&objects, &records, config, &request, &mut |event| {
        render_copy_event(&spinner, &event)
    })
    .map_err(|error| error.to_string())?;
    spinner.finish_and_clear();

    term::success(&format!(
        "{} object(s) copied, {} skipped, {} record(s) written, {} experiment(s) rehashed.",
        report.copied_objects.len(),
        report.skipped_objects.len(),
        report.copied_records,
        report.rehashed_experiments.len(),
    ));
    report_failures(&report.failures);
    Ok(())
}

fn ls(args: LsArgs, config: &SandboxConfig, handle: &Handle) -> Result<(), String> {
    let aws = AwsClients::new(handle.clone(), &config.region);
    let records = DynamoRecordStore::new(aws.dynamodb.clone(), aws.handle.clone());

    let table = config
        .experiments_table(args.origin)
        .map_err(|error| error.to_string())?;
    let summaries = records.scan_experiment_summaries(table)?;

    println!("{:<40} {}", "EXPERIMENT ID", "NAME");
    for summary in summaries {
        println!("{:<40} {}", summary.id, summary.name);
    }
    Ok(())
}

/// Resolve the platform username for the invoking operator's email.
pub fn resolve_grantee(
    aws: &AwsClients,
    config: &SandboxConfig,
    email: &str,
) -> Result<String, String> {
    let user_pool = config
        .cognito_user_pool
        .clone()
        .ok_or_else(|| "cognito-user-pool must be configured to grant experiment access".to_string())?;
    let identity = CognitoIdentity::new(aws.cognito.clone(), aws.handle.clone(), user_pool);
    identity.username_for_email(email)
}
