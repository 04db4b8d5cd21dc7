//! YAML configuration file consumed by the collectors.

use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub included_workspaces: Vec<String>,

    pub refs: Option<RefsConfig>,

    pub commit: Option<CommitConfig>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    Basic,
    /// Accepted but not implemented: requests go out without credentials.
    OAuth2,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(rename = "type", default)]
    pub kind: AuthKind,

    pub basic: Option<BasicAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicAuth {
    pub username: String,

    #[serde(deserialize_with = "secret_string")]
    pub password: SecretString,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefsConfig {
    #[serde(default)]
    pub included_repositories: Vec<String>,

    #[serde(default = "enabled")]
    pub collect_total_branch: bool,

    #[serde(default = "enabled")]
    pub collect_total_tag: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitConfig {
    #[serde(default)]
    pub included_repositories: Vec<String>,

    #[serde(default = "enabled")]
    pub collect_total_commit_repo: bool,

    #[serde(default = "enabled")]
    pub collect_total_commit_user: bool,

    #[serde(default)]
    pub user_labels: UserLabelPolicy,
}

/// Which commit supplies the descriptive labels (name, repository) of a user's
/// commit total. The count itself is always cumulative.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserLabelPolicy {
    #[default]
    LastSeen,
    FirstSeen,
}

const fn enabled() -> bool {
    true
}

fn secret_string<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl ExporterConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("error opening config file {}", path.display()))?;

        Self::from_yaml(&raw).with_context(|| format!("error parsing config file {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.auth.kind == AuthKind::Basic && self.auth.basic.is_none() && !self.is_empty() {
            return Err(anyhow!("auth.type is basic but the auth.basic block is missing"));
        }

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.included_workspaces.is_empty() && self.refs.is_none() && self.commit.is_none()
    }
}
