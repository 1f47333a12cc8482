use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_yaml::Value;

use crate::github::Deployment;

pub const SANDBOX_ID_PLACEHOLDER: &str = "STAGING_SANDBOX_ID";

/// Extract `(org, repo)` from a chart git URL of the form
/// `git@github.com:org/repo`.
pub fn parse_chart_repo(git_url: &str) -> Result<(String, String), String> {
    let path = git_url
        .split(':')
        .nth(1)
        .ok_or_else(|| format!("chart git URL '{git_url}' has no path component"))?;
    let mut segments = path.split('/');
    match (segments.next(), segments.next()) {
        (Some(org), Some(repo)) if !org.is_empty() && !repo.is_empty() => {
            Ok((org.to_string(), repo.trim_end_matches(".git").to_string()))
        }
        _ => Err(format!("chart git URL '{git_url}' is not org/repo shaped")),
    }
}

/// Combine the fetched templates into one multi-document manifest, flipping
/// automation off for pinned deployments and resolving each chart ref
/// through `resolve_ref(chart, pinned)` (a SHA for pinned charts, a branch
/// ref otherwise).
pub fn render_manifests(
    templates: &[Deployment],
    pins: &[String],
    resolve_ref: &mut dyn FnMut(&Value, bool) -> Result<String, String>,
) -> Result<String, String> {
    let mut documents = Vec::new();

    for deployment in templates {
        let pinned = pins.contains(&deployment.repo);

        for document in serde_yaml::Deserializer::from_str(&deployment.text) {
            let mut document = Value::deserialize(document)
                .map_err(|error| format!("invalid manifest for {}: {error}", deployment.repo))?;
            if document.is_null() {
                continue;
            }

            // automatic image updates are disabled on pinned deployments
            if let Some(automated) = document
                .get_mut("metadata")
                .and_then(|metadata| metadata.get_mut("annotations"))
                .and_then(|annotations| annotations.get_mut("fluxcd.io/automated"))
            {
                if !automated.is_null() {
                    *automated = Value::String((!pinned).to_string());
                }
            }

            let chart_ref = document
                .get("spec")
                .and_then(|spec| spec.get("chart"))
                .and_then(|chart| chart.get("ref"))
                .map(|value| !value.is_null())
                .unwrap_or(false);
            if chart_ref {
                let chart = document["spec"]["chart"].clone();
                let resolved = resolve_ref(&chart, pinned)?;
                document["spec"]["chart"]["ref"] = Value::String(resolved);
            }

            documents.push(document);
        }
    }

    let rendered = documents
        .iter()
        .map(|document| {
            serde_yaml::to_string(document)
                .map_err(|error| format!("failed to render manifest: {error}"))
        })
        .collect::<Result<Vec<_>, _>>()?
        .join("---\n");

    Ok(rendered)
}

/// Substitute the sandbox ID into the rendered manifest and encode it for
/// the workflow input.
pub fn finalize_manifest(manifest: &str, sandbox_id: &str) -> String {
    let substituted = manifest.replace(SANDBOX_ID_PLACEHOLDER, sandbox_id);
    BASE64.encode(substituted)
}
