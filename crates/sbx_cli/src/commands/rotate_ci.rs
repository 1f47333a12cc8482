use std::collections::BTreeMap;
use std::path::Path;

use clap::Args;
use sbx_pipeline::SandboxConfig;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::aws::ci_stack::{CiNames, CiUserStack, StackOutcome};
use crate::aws::AwsClients;
use crate::github::GitHubClient;
use crate::term;

#[derive(Args)]
pub struct RotateCiArgs {
    /// A personal access token with the required permissions
    #[arg(short = 't', long, env = "GITHUB_API_TOKEN")]
    pub token: String,
    /// The organization to perform the operation in
    #[arg(short = 'o', long, env = "GITHUB_ORG")]
    pub org: Option<String>,
}

pub fn run(args: RotateCiArgs, config_path: &Path, handle: &Handle) -> Result<(), String> {
    let config = SandboxConfig::load(config_path).map_err(|error| error.to_string())?;
    let default_org = config
        .github_org
        .clone()
        .ok_or_else(|| "github-org must be configured".to_string())?;
    let org = args.org.clone().unwrap_or_else(|| default_org.clone());
    let github = GitHubClient::new(&args.token);

    term::step("Finding repositories with CI policies");
    let repositories = github.list_repositories(&org)?;
    term::bullet(&format!(
        "found {} repositories in organization {org}",
        repositories.len()
    ));

    let mut policies: BTreeMap<String, Value> = BTreeMap::new();
    for repository in repositories.iter().filter(|repo| !repo.archived) {
        if let Some(repo_policies) = github.repo_ci_policies(&org, &repository.name)? {
            policies.insert(repository.name.clone(), repo_policies);
        }
    }
    term::bullet(&format!(
        "{} repositories are marked as requiring CI IAM policies",
        policies.len()
    ));
    if policies.is_empty() {
        term::warn("nothing to rotate");
        return Ok(());
    }

    let aws = AwsClients::new(handle.clone(), &config.region);
    let stack = CiUserStack::new(aws.cloudformation.clone(), aws.iam.clone(), aws.handle.clone());
    let names = CiNames::for_org(&org, &default_org);

    term::step("Applying the CI users stack");
    match stack.apply(&names, &policies)? {
        StackOutcome::Applied => term::bullet("stack settled"),
        StackOutcome::UpToDate => term::bullet("all users are up to date"),
    }

    term::step("Creating new access keys");
    let mut keys: BTreeMap<String, (String, String)> = BTreeMap::new();
    for repo in policies.keys() {
        keys.insert(repo.clone(), stack.create_access_key(&names.username(repo))?);
    }

    term::step("Updating repository secrets");
    let mut results: BTreeMap<String, u16> = BTreeMap::new();
    for (repo, (access_key_id, secret_access_key)) in &keys {
        let status = match github.actions_public_key(&org, repo) {
            Ok(public_key) => {
                let mut last = 0u16;
                for (name, value) in [
                    ("AWS_ACCESS_KEY_ID", access_key_id.as_str()),
                    ("AWS_SECRET_ACCESS_KEY", secret_access_key.as_str()),
                    ("API_TOKEN_GITHUB", args.token.as_str()),
                ] {
                    last = github.put_actions_secret(&org, repo, &public_key, name, value)?;
                    if !(200..300).contains(&last) {
                        break;
                    }
                }
                last
            }
            Err(_) => 0,
        };
        results.insert(repo.clone(), status);
    }

    let success = settle_results(&github_results_header(), &stack, &names, &keys, &results)?;
    if success {
        term::success("All done!");
        Ok(())
    } else {
        Err("there have been errors; check the logs and try again".to_string())
    }
}

fn github_results_header() -> String {
    format!(
        "{:<25}{:<25}{:<20}",
        "REPOSITORY", "UPDATE STATUS (HTTP)", "STATUS"
    )
}

/// Per-repository settlement: failed secret updates roll the fresh key
/// back; successful ones retire every older key for that user.
fn settle_results(
    header: &str,
    stack: &CiUserStack,
    names: &CiNames,
    keys: &BTreeMap<String, (String, String)>,
    results: &BTreeMap<String, u16>,
) -> Result<bool, String> {
    term::step("Results for each repository");
    eprintln!("{header}");

    let mut success = true;
    for (repo, status) in results {
        let username = names.username(repo);
        let (fresh_key_id, _) = &keys[repo];

        let outcome = if !(200..300).contains(status) {
            stack.delete_access_key(&username, fresh_key_id)?;
            success = false;
            "key rolled back".to_string()
        } else {
            let removed = stack.delete_other_keys(&username, fresh_key_id)?;
            format!("removed {removed} old key(s)")
        };

        eprintln!("{repo:<25}{status:<25}{outcome:<20}");
    }

    Ok(success)
}
