use std::collections::BTreeMap;
use std::path::Path;

use clap::Args;
use sbx_core::naming::{default_sandbox_id, prefixed, validate_sandbox_id, Environment};
use sbx_pipeline::adapters::{ExperimentSummary, RecordStore};
use sbx_pipeline::copy::{copy_experiments, CopyRequest};
use sbx_pipeline::SandboxConfig;
use serde_json::json;
use serde_yaml::Value;
use tokio::runtime::Handle;

use crate::aws::object_store::S3ObjectStore;
use crate::aws::record_store::DynamoRecordStore;
use crate::aws::secrets::{OperatorCredentials, SecretsEncryptor};
use crate::aws::AwsClients;
use crate::commands::experiment::resolve_grantee;
use crate::commands::{progress_spinner, render_copy_event, report_failures};
use crate::github::{Deployment, GitHubClient, RefSpec};
use crate::manifest::{finalize_manifest, parse_chart_repo, render_manifests};
use crate::term;

/// Repositories a sandbox deployment is composed of.
const STAGE_REPOS: [&str; 4] = ["ui", "api", "worker", "pipeline"];
const DEFAULT_BRANCH: &str = "develop";
const DEPLOY_WORKFLOW: &str = "Deploy a staging environment";

#[derive(Args)]
pub struct StageArgs {
    /// Deployments to source, as `repo` or `repo/ref` (e.g. `api/22` for a
    /// pull request, `ui/my-branch` for a branch)
    pub deployments: Vec<String>,
    /// A personal access token with the required permissions
    #[arg(short = 't', long, env = "GITHUB_API_TOKEN")]
    pub token: String,
    /// The organization to perform the operation in
    #[arg(long, env = "GITHUB_ORG")]
    pub org: Option<String>,
    /// Sandbox ID; derived from the manifest contents when omitted
    #[arg(long)]
    pub sandbox_id: Option<String>,
    /// Experiment ID to copy into the sandbox (repeatable)
    #[arg(long = "experiment")]
    pub experiments: Vec<String>,
    /// Deployment to pin to its current revision (repeatable); defaults to
    /// every deployment tracking the default branch
    #[arg(long = "pin")]
    pub pins: Vec<String>,
    /// Email used to log in to the platform; required when copying
    /// experiments
    #[arg(long, env = "SBX_EMAIL")]
    pub email: Option<String>,
    /// Nickname fragment for the generated sandbox ID
    #[arg(long, env = "SBX_NICK")]
    pub nickname: Option<String>,
    /// Confirm the deployment
    #[arg(long)]
    pub yes: bool,
}

pub fn run(args: StageArgs, config_path: &Path, handle: &Handle) -> Result<(), String> {
    let config = SandboxConfig::load(config_path).map_err(|error| error.to_string())?;
    let org = args
        .org
        .clone()
        .or_else(|| config.github_org.clone())
        .ok_or_else(|| "github-org must be configured".to_string())?;
    if !args.experiments.is_empty() && args.email.is_none() {
        return Err(
            "copying experiments requires the email you use to log in to the platform; \
             set SBX_EMAIL or pass --email"
                .to_string(),
        );
    }

    let github = GitHubClient::new(&args.token);

    term::step("Fetching deployment manifests");
    let repo_refs = parse_deployment_refs(&args.deployments)?;
    let templates = compile_requirements(&github, &org, &config.iac_repository, &repo_refs)?;

    let pins = resolve_pins(&args.pins, &templates)?;
    term::bullet(&format!("pinned deployments: {}", pins.join(", ")));

    term::step("Rendering sandbox manifest");
    let manifest = render_manifests(&templates, &pins, &mut |chart, pinned| {
        resolve_chart_ref(&github, &repo_refs, chart, pinned)
    })?;

    let aws = AwsClients::new(handle.clone(), &config.region);
    let records = DynamoRecordStore::new(aws.dynamodb.clone(), aws.handle.clone());
    let all_experiments = records.scan_experiment_summaries(
        config
            .experiments_table(Environment::Production)
            .map_err(|error| error.to_string())?,
    )?;

    let sandbox_id = choose_sandbox_id(&args, &templates, &manifest, &all_experiments)?;
    term::bullet(&format!("sandbox ID: {sandbox_id}"));

    let (to_stage, already_staged) =
        partition_experiments(&args.experiments, &sandbox_id, &all_experiments);
    for experiment_id in &already_staged {
        term::bullet(&format!("already staged: {experiment_id}"));
    }
    if to_stage.is_empty() {
        term::warn("no experiments chosen; skipping creation of isolated staging data");
    }

    if !args.yes {
        return Err("pass --yes to confirm creating this deployment".to_string());
    }

    term::step("Dispatching deployment");
    let (access_key, secret_key) = aws.operator_credentials()?;
    let secrets = SecretsEncryptor::new(aws.kms.clone(), aws.handle.clone()).encrypt_credentials(
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
        DEPLOY_WORKFLOW,
        "master",
        json!({
            "manifest": finalize_manifest(&manifest, &sandbox_id),
            "sandbox-id": sandbox_id,
            "secrets": secrets,
        }),
    )?;

    if !to_stage.is_empty() {
        term::step("Copying experiments");
        let email = args.email.as_deref().unwrap_or_default();
        let grantee = resolve_grantee(&aws, &config, email)?;
        let objects = S3ObjectStore::new(aws.s3.clone(), aws.handle.clone());

        let request = CopyRequest {
            experiments: to_stage.clone(),
            sandbox_id: sandbox_id.clone(),
            origin: Environment::Production,
            destination: Environment::Staging,
            grantee: Some(grantee),
        };

        let spinner = progress_spinner();
        let report = copy_experiments(&objects, &records, &config, &request, &mut |event| {
            render_copy_event(&spinner, &event)
        })
        .map_err(|error| error.to_string())?;
        spinner.finish_and_clear();
        report_failures(&report.failures);
    }

    term::success(&format!(
        "Deployment submitted. You can check your progress at \
         https://github.com/{org}/{}/actions",
        config.iac_repository
    ));

    if let Some(domain) = &config.staging_domain {
        term::success(&format!(
            "The deployment, when done, will be available at https://ui-{sandbox_id}.{domain}/"
        ));

        let available: Vec<&String> = already_staged.iter().chain(to_stage.iter()).collect();
        if !available.is_empty() {
            term::success("Staging-specific experiments are available at:");
            for experiment_id in available {
                let copied_id = if experiment_id.starts_with(&format!("{sandbox_id}-")) {
                    experiment_id.clone()
                } else {
                    prefixed(&sandbox_id, experiment_id)
                };
                term::bullet(&format!(
                    "https://ui-{sandbox_id}.{domain}/experiments/{copied_id}/data-processing"
                ));
            }
        }
    }

    Ok(())
}

/// Parse `repo/ref` CLI arguments into a ref per deployment repository.
fn parse_deployment_refs(deployments: &[String]) -> Result<BTreeMap<String, RefSpec>, String> {
    let mut refs: BTreeMap<String, RefSpec> = STAGE_REPOS
        .iter()
        .map(|repo| (repo.to_string(), RefSpec::Default))
        .collect();

    for deployment in deployments {
        let (repo, ref_spec) = match deployment.split_once('/') {
            Some((repo, raw_ref)) => (repo, RefSpec::parse(raw_ref)),
            None => (deployment.as_str(), RefSpec::Default),
        };
        if !STAGE_REPOS.contains(&repo) {
            return Err(format!(
                "unknown deployment '{repo}' (expected one of: {})",
                STAGE_REPOS.join(", ")
            ));
        }
        refs.insert(repo.to_string(), ref_spec);
    }

    Ok(refs)
}

fn compile_requirements(
    github: &GitHubClient,
    org: &str,
    iac_repo: &str,
    repo_refs: &BTreeMap<String, RefSpec>,
) -> Result<Vec<Deployment>, String> {
    let mut templates = Vec::with_capacity(STAGE_REPOS.len());
    for repo in STAGE_REPOS {
        let ref_spec = repo_refs.get(repo).cloned().unwrap_or(RefSpec::Default);
        templates.push(github.fetch_release_manifest(
            org,
            iac_repo,
            repo,
            &ref_spec,
            DEFAULT_BRANCH,
        )?);
    }

    eprintln!(
        "{:<15}{:<12}{:<8}{}",
        "REPOSITORY", "REF", "STATUS", "MANIFEST URL"
    );
    let mut can_deploy = true;
    for deployment in &templates {
        eprintln!(
            "{:<15}{:<12}{:<8}{}",
            deployment.repo,
            deployment.ref_spec.display(DEFAULT_BRANCH),
            deployment.status,
            deployment.url
        );
        can_deploy = can_deploy && deployment.found();
    }

    if !can_deploy {
        return Err(
            "not all deployment files could be found; check the URLs and status codes \
             printed above and try again"
                .to_string(),
        );
    }
    Ok(templates)
}

/// Pins default to every deployment that tracks the default branch: those
/// are the ones the operator is not testing, so they should not drift while
/// the sandbox lives.
fn resolve_pins(requested: &[String], templates: &[Deployment]) -> Result<Vec<String>, String> {
    if requested.is_empty() {
        return Ok(templates
            .iter()
            .filter(|deployment| deployment.ref_spec == RefSpec::Default)
            .map(|deployment| deployment.repo.clone())
            .collect());
    }

    for pin in requested {
        if !STAGE_REPOS.contains(&pin.as_str()) {
            return Err(format!(
                "cannot pin unknown deployment '{pin}' (expected one of: {})",
                STAGE_REPOS.join(", ")
            ));
        }
    }
    Ok(requested.to_vec())
}

/// Resolve the ref a chart document should carry: a commit SHA when the
/// deployment is pinned, the tracking branch ref otherwise. Charts living in
/// repositories outside the deployment set follow their own default branch.
fn resolve_chart_ref(
    github: &GitHubClient,
    repo_refs: &BTreeMap<String, RefSpec>,
    chart: &Value,
    pinned: bool,
) -> Result<String, String> {
    let git_url = chart
        .get("git")
        .and_then(Value::as_str)
        .ok_or_else(|| "chart document has no git URL".to_string())?;
    let (chart_org, chart_repo) = parse_chart_repo(git_url)?;

    let ref_spec = repo_refs
        .get(&chart_repo)
        .cloned()
        .unwrap_or(RefSpec::Default);
    let default_branch = match ref_spec {
        RefSpec::Default => github.default_branch(&chart_org, &chart_repo)?,
        _ => DEFAULT_BRANCH.to_string(),
    };
    let git_ref = ref_spec.git_ref(&default_branch);

    if pinned {
        github.ref_head_sha(&chart_org, &chart_repo, &git_ref)
    } else {
        Ok(git_ref)
    }
}

fn choose_sandbox_id(
    args: &StageArgs,
    templates: &[Deployment],
    manifest: &str,
    all_experiments: &[ExperimentSummary],
) -> Result<String, String> {
    let sandbox_id = match &args.sandbox_id {
        Some(id) => id.clone(),
        None => {
            let fragments: Vec<String> = templates
                .iter()
                .filter(|deployment| deployment.ref_spec != RefSpec::Default)
                .map(|deployment| {
                    format!(
                        "{}{}",
                        deployment.repo,
                        deployment.ref_spec.display(DEFAULT_BRANCH)
                    )
                })
                .collect();
            let nickname = args
                .nickname
                .clone()
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_default();
            default_sandbox_id(&nickname, &fragments, manifest)
        }
    };

    validate_sandbox_id(&sandbox_id).map_err(|error| error.to_string())?;
    if all_experiments
        .iter()
        .any(|experiment| experiment.id == sandbox_id)
    {
        return Err(format!(
            "sandbox ID '{sandbox_id}' is the same as the name of an experiment; \
             please use another one"
        ));
    }
    Ok(sandbox_id)
}

/// Split the requested experiments into ones that still need staging and
/// ones already staged under this sandbox, so nothing is staged twice.
fn partition_experiments(
    requested: &[String],
    sandbox_id: &str,
    all_experiments: &[ExperimentSummary],
) -> (Vec<String>, Vec<String>) {
    let staged: Vec<String> = all_experiments
        .iter()
        .filter(|experiment| experiment.id.starts_with(&format!("{sandbox_id}-")))
        .map(|experiment| experiment.id.clone())
        .collect();

    let excluded: Vec<String> = staged
        .iter()
        .map(|id| id.replacen(&format!("{sandbox_id}-"), "", 1))
        .chain(staged.iter().cloned())
        .collect();

    let to_stage = requested
        .iter()
        .filter(|experiment_id| !excluded.contains(*experiment_id))
        .cloned()
        .collect();

    (to_stage, staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str) -> ExperimentSummary {
        ExperimentSummary {
            id: id.to_string(),
            name: String::new(),
        }
    }

    #[test]
    fn parses_deployment_refs_with_defaults() {
        let refs = parse_deployment_refs(&[
            "api/22".to_string(),
            "ui/fix-layout".to_string(),
        ])
        .expect("refs should parse");

        assert_eq!(refs["api"], RefSpec::PullRequest(22));
        assert_eq!(refs["ui"], RefSpec::Branch("fix-layout".to_string()));
        assert_eq!(refs["worker"], RefSpec::Default);
        assert_eq!(refs["pipeline"], RefSpec::Default);
    }

    #[test]
    fn rejects_unknown_deployment_repos() {
        let error = parse_deployment_refs(&["dashboard/1".to_string()])
            .expect_err("unknown repo should fail");
        assert!(error.contains("unknown deployment 'dashboard'"));
    }

    #[test]
    fn already_staged_experiments_are_not_staged_twice() {
        let all = vec![
            summary("exp123"),
            summary("exp456"),
            summary("sbx1-exp123"),
        ];

        let (to_stage, staged) = partition_experiments(
            &["exp123".to_string(), "exp456".to_string()],
            "sbx1",
            &all,
        );

        assert_eq!(to_stage, vec!["exp456".to_string()]);
        assert_eq!(staged, vec!["sbx1-exp123".to_string()]);
    }
}
