use std::fs;
use std::path::Path;

use sbx_core::naming::Environment;
use sbx_core::remap::TableRole;
use serde::Deserialize;

use crate::error::PipelineError;

/// Persisted mapping of logical names to bucket/table identifiers, read
/// from `config.yaml` at the repository root. Every pipeline component takes
/// this as input; nothing else knows concrete resource names.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SandboxConfig {
    #[serde(rename = "source-buckets")]
    pub source_buckets: Vec<String>,
    #[serde(rename = "source-tables")]
    pub source_tables: Vec<String>,

    #[serde(rename = "production-experiments-table")]
    pub production_experiments_table: String,
    #[serde(rename = "staging-experiments-table")]
    pub staging_experiments_table: String,
    #[serde(rename = "production-samples-table")]
    pub production_samples_table: String,
    #[serde(rename = "staging-samples-table")]
    pub staging_samples_table: String,
    #[serde(rename = "production-projects-table")]
    pub production_projects_table: String,
    #[serde(rename = "staging-projects-table")]
    pub staging_projects_table: String,

    #[serde(rename = "region", default = "default_region")]
    pub region: String,
    #[serde(rename = "cognito-user-pool", default)]
    pub cognito_user_pool: Option<String>,
    #[serde(rename = "kms-key-alias", default = "default_kms_key_alias")]
    pub kms_key_alias: String,
    #[serde(rename = "github-org", default)]
    pub github_org: Option<String>,
    #[serde(rename = "iac-repository", default = "default_iac_repository")]
    pub iac_repository: String,
    #[serde(rename = "staging-domain", default)]
    pub staging_domain: Option<String>,
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

fn default_kms_key_alias() -> String {
    "alias/iac-secret-key".to_string()
}

fn default_iac_repository() -> String {
    "iac".to_string()
}

impl SandboxConfig {
    pub fn from_yaml(text: &str) -> Result<Self, PipelineError> {
        serde_yaml::from_str(text)
            .map_err(|error| PipelineError::Configuration(format!("invalid config file: {error}")))
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path).map_err(|error| {
            PipelineError::Configuration(format!(
                "cannot read config file {}: {error}",
                path.display()
            ))
        })?;
        Self::from_yaml(&text)
    }

    pub fn experiments_table(&self, env: Environment) -> Result<&str, PipelineError> {
        match env {
            Environment::Production => Ok(&self.production_experiments_table),
            Environment::Staging => Ok(&self.staging_experiments_table),
            Environment::Development => Err(no_table_for(env, TableRole::Experiments)),
        }
    }

    pub fn samples_table(&self, env: Environment) -> Result<&str, PipelineError> {
        match env {
            Environment::Production => Ok(&self.production_samples_table),
            Environment::Staging => Ok(&self.staging_samples_table),
            Environment::Development => Err(no_table_for(env, TableRole::Samples)),
        }
    }

    pub fn projects_table(&self, env: Environment) -> Result<&str, PipelineError> {
        match env {
            Environment::Production => Ok(&self.production_projects_table),
            Environment::Staging => Ok(&self.staging_projects_table),
            Environment::Development => Err(no_table_for(env, TableRole::Projects)),
        }
    }

    /// Role a table plays in the copy, resolved by name against the
    /// configured tables for every environment.
    pub fn table_role(&self, table: &str) -> Option<TableRole> {
        if table == self.production_experiments_table || table == self.staging_experiments_table {
            Some(TableRole::Experiments)
        } else if table == self.production_samples_table || table == self.staging_samples_table {
            Some(TableRole::Samples)
        } else if table == self.production_projects_table || table == self.staging_projects_table {
            Some(TableRole::Projects)
        } else {
            None
        }
    }
}

fn no_table_for(env: Environment, role: TableRole) -> PipelineError {
    PipelineError::Configuration(format!(
        "no {} table is configured for the {env} environment",
        role.as_str()
    ))
}

#[cfg(test)]
pub(crate) const TEST_CONFIG_YAML: &str = "\
source-buckets:
  - biodata-source-production
  - biodata-cell-sets-production
  - biodata-originals-production
source-tables:
  - experiments-production
  - samples-production
  - projects-production
production-experiments-table: experiments-production
staging-experiments-table: experiments-staging
production-samples-table: samples-production
staging-samples-table: samples-staging
production-projects-table: projects-production
staging-projects-table: projects-staging
github-org: example-org
";

#[cfg(test)]
pub(crate) fn test_config() -> SandboxConfig {
    SandboxConfig::from_yaml(TEST_CONFIG_YAML).expect("test config should parse")
}
