use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crypto_box::aead::OsRng;
use crypto_box::PublicKey;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "sbx-cli";

/// A ref a deployment can be pinned to: the default branch, a named branch,
/// or a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSpec {
    Default,
    Branch(String),
    PullRequest(u64),
}

impl RefSpec {
    /// Parse the ref part of a `repo/ref` CLI argument. Numeric refs are
    /// pull requests, anything else is a branch.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<u64>() {
            Ok(number) => Self::PullRequest(number),
            Err(_) => Self::Branch(raw.to_string()),
        }
    }

    /// Name of the rendered manifest template for this ref.
    pub fn template_file(&self, default_branch: &str) -> String {
        match self {
            Self::Default => format!("refs-heads-{default_branch}.yaml"),
            Self::Branch(branch) => format!("refs-heads-{branch}.yaml"),
            Self::PullRequest(number) => format!("refs-pull-{number}-merge.yaml"),
        }
    }

    /// Fully-qualified git ref, e.g. `refs/pull/22/head`.
    pub fn git_ref(&self, default_branch: &str) -> String {
        match self {
            Self::Default => format!("refs/heads/{default_branch}"),
            Self::Branch(branch) => format!("refs/heads/{branch}"),
            Self::PullRequest(number) => format!("refs/pull/{number}/head"),
        }
    }

    pub fn display(&self, default_branch: &str) -> String {
        match self {
            Self::Default => default_branch.to_string(),
            Self::Branch(branch) => branch.clone(),
            Self::PullRequest(number) => number.to_string(),
        }
    }
}

/// One fetched release manifest template.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub repo: String,
    pub ref_spec: RefSpec,
    pub url: String,
    pub status: u16,
    pub text: String,
}

impl Deployment {
    pub fn found(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionsPublicKey {
    pub key: String,
    pub key_id: String,
}

/// Thin client for the source-control host's raw-content and REST surfaces.
pub struct GitHubClient {
    http: Client,
    token: String,
    api_base: String,
    raw_base: String,
}

impl GitHubClient {
    pub fn new(token: &str) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build GitHub client");
        Self {
            http,
            token: token.to_string(),
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
        }
    }

    fn get_api(&self, path: &str) -> Result<Value, String> {
        let url = format!("{}{path}", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(|error| format!("request to {url} failed: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("request to {url} failed with status {status}"));
        }
        response
            .json()
            .map_err(|error| format!("invalid response from {url}: {error}"))
    }

    /// Fetch the rendered staging-candidate manifest for one repository from
    /// the IaC repository's raw contents.
    pub fn fetch_release_manifest(
        &self,
        org: &str,
        iac_repo: &str,
        repo: &str,
        ref_spec: &RefSpec,
        default_branch: &str,
    ) -> Result<Deployment, String> {
        let template = ref_spec.template_file(default_branch);
        let url = format!(
            "{}/{org}/{iac_repo}/master/releases/staging-candidates/{repo}/{template}",
            self.raw_base
        );

        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|error| format!("request to {url} failed: {error}"))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|error| format!("invalid response from {url}: {error}"))?;

        Ok(Deployment {
            repo: repo.to_string(),
            ref_spec: ref_spec.clone(),
            url,
            status,
            text,
        })
    }

    /// Whether a staged sandbox manifest exists in the IaC repository.
    pub fn manifest_exists(&self, org: &str, iac_repo: &str, sandbox_id: &str) -> bool {
        let url = format!(
            "{}/{org}/{iac_repo}/master/releases/staging/{sandbox_id}.yaml",
            self.raw_base
        );
        match self.http.get(&url).send() {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn default_branch(&self, org: &str, repo: &str) -> Result<String, String> {
        let body = self.get_api(&format!("/repos/{org}/{repo}"))?;
        body["default_branch"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("repository {org}/{repo} has no default branch"))
    }

    /// SHA at the head of the given ref.
    pub fn ref_head_sha(&self, org: &str, repo: &str, git_ref: &str) -> Result<String, String> {
        let short_ref = git_ref.trim_start_matches("refs/");
        let body = self.get_api(&format!("/repos/{org}/{repo}/git/ref/{short_ref}"))?;
        body["object"]["sha"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("ref {git_ref} in {org}/{repo} has no object SHA"))
    }

    /// Dispatch a workflow by its display name. Returns an error when no
    /// workflow carries that name.
    pub fn dispatch_workflow(
        &self,
        org: &str,
        repo: &str,
        workflow_name: &str,
        git_ref: &str,
        inputs: Value,
    ) -> Result<(), String> {
        let listing = self.get_api(&format!("/repos/{org}/{repo}/actions/workflows"))?;
        let workflow_id = listing["workflows"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|workflow| workflow["name"].as_str() == Some(workflow_name))
            .and_then(|workflow| workflow["id"].as_u64())
            .ok_or_else(|| format!("workflow '{workflow_name}' not found in {org}/{repo}"))?;

        let url = format!(
            "{}/repos/{org}/{repo}/actions/workflows/{workflow_id}/dispatches",
            self.api_base
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({"ref": git_ref, "inputs": inputs}))
            .send()
            .map_err(|error| format!("request to {url} failed: {error}"))?;

        if !response.status().is_success() {
            return Err(format!(
                "could not dispatch workflow '{workflow_name}': status {} \
                 (does the token have the required privileges?)",
                response.status()
            ));
        }
        Ok(())
    }

    /// All repositories of the organization, paginated.
    pub fn list_repositories(&self, org: &str) -> Result<Vec<RepoSummary>, String> {
        let mut repos = Vec::new();
        let mut page = 1;

        loop {
            let body = self.get_api(&format!("/orgs/{org}/repos?per_page=100&page={page}"))?;
            let batch: Vec<RepoSummary> = serde_json::from_value(body)
                .map_err(|error| format!("invalid repository listing: {error}"))?;
            if batch.is_empty() {
                break;
            }
            repos.extend(batch);
            page += 1;
        }

        Ok(repos)
    }

    /// The `ci-policies` declaration from a repository's `.ci.yml`, if any.
    pub fn repo_ci_policies(&self, org: &str, repo: &str) -> Result<Option<Value>, String> {
        for file in [".ci.yml", ".ci.yaml"] {
            let body = match self.get_api(&format!("/repos/{org}/{repo}/contents/{file}")) {
                Ok(body) => body,
                Err(_) => continue,
            };
            let Some(encoded) = body["content"].as_str() else {
                continue;
            };
            let decoded = BASE64
                .decode(encoded.replace(['\n', '\r'], ""))
                .map_err(|error| format!("invalid content encoding for {repo}/{file}: {error}"))?;
            let parsed: Value = serde_yaml::from_slice(&decoded)
                .map_err(|error| format!("invalid YAML in {repo}/{file}: {error}"))?;

            return Ok(parsed.get("ci-policies").cloned());
        }

        Ok(None)
    }

    pub fn actions_public_key(&self, org: &str, repo: &str) -> Result<ActionsPublicKey, String> {
        let body = self.get_api(&format!("/repos/{org}/{repo}/actions/secrets/public-key"))?;
        serde_json::from_value(body)
            .map_err(|error| format!("invalid public key response for {org}/{repo}: {error}"))
    }

    /// Write one actions secret, sealed against the repository public key.
    /// Returns the HTTP status code so callers can report per-repo results.
    pub fn put_actions_secret(
        &self,
        org: &str,
        repo: &str,
        public_key: &ActionsPublicKey,
        name: &str,
        value: &str,
    ) -> Result<u16, String> {
        let sealed = seal_secret(&public_key.key, value)?;
        let url = format!(
            "{}/repos/{org}/{repo}/actions/secrets/{name}",
            self.api_base
        );
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({
                "encrypted_value": sealed,
                "key_id": public_key.key_id,
            }))
            .send()
            .map_err(|error| format!("request to {url} failed: {error}"))?;

        Ok(response.status().as_u16())
    }
}

/// Seal a secret value for the hosting platform: an anonymous public-key box
/// against the repository's base64-encoded key, base64-encoded for
/// transport.
fn seal_secret(public_key_b64: &str, value: &str) -> Result<String, String> {
    let key_bytes: [u8; 32] = BASE64
        .decode(public_key_b64)
        .map_err(|error| format!("invalid secrets public key: {error}"))?
        .try_into()
        .map_err(|_| "secrets public key has the wrong length".to_string())?;
    let public_key = PublicKey::from(key_bytes);

    let sealed = public_key
        .seal(&mut OsRng, value.as_bytes())
        .map_err(|error| format!("failed to seal secret: {error}"))?;
    Ok(BASE64.encode(sealed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_refs_as_pull_requests() {
        assert_eq!(RefSpec::parse("22"), RefSpec::PullRequest(22));
        assert_eq!(
            RefSpec::parse("fix/copy-loop"),
            RefSpec::Branch("fix/copy-loop".to_string())
        );
    }

    #[test]
    fn builds_template_names_per_ref_kind() {
        assert_eq!(
            RefSpec::Default.template_file("develop"),
            "refs-heads-develop.yaml"
        );
        assert_eq!(
            RefSpec::Branch("main".to_string()).template_file("develop"),
            "refs-heads-main.yaml"
        );
        assert_eq!(
            RefSpec::PullRequest(22).template_file("develop"),
            "refs-pull-22-merge.yaml"
        );
    }

    #[test]
    fn builds_fully_qualified_git_refs() {
        assert_eq!(RefSpec::Default.git_ref("develop"), "refs/heads/develop");
        assert_eq!(
            RefSpec::PullRequest(7).git_ref("develop"),
            "refs/pull/7/head"
        );
    }

    #[test]
    fn sealed_secrets_are_fresh_per_call() {
        // sealing uses an ephemeral key, so two seals of the same value
        // must differ while both remain valid base64
        let key = BASE64.encode([7u8; 32]);
        let first = seal_secret(&key, "secret-value").expect("seal should succeed");
        let second = seal_secret(&key, "secret-value").expect("seal should succeed");
        assert_ne!(first, second);
        assert!(BASE64.decode(first).is_ok());
    }
}
