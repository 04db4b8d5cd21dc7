//! Shared helpers for the sub-collectors:
//! - repository inclusion lists (`workspace/slug` entries, `["*"]` admits everything)
//! - gauge family construction
//! - label rendering

use crate::client::models::Repository;
use anyhow::{Context, Result};
use prometheus::{GaugeVec, Opts};
use std::collections::HashSet;

/// Metric namespace shared by every family this exporter emits.
pub const NAMESPACE: &str = "bitbucket";

/// Entry that, when it is the only one in a list, admits every repository.
pub const MATCH_ALL: &str = "*";

/// Which repositories a sub-collector processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepositoryFilter {
    All,
    Only(HashSet<String>),
}

impl RepositoryFilter {
    /// Build a filter from a configured inclusion list.
    ///
    /// Exactly `["*"]` admits everything; any other list admits exactly the
    /// `workspace/slug` entries it names. An empty list admits nothing.
    pub fn from_list(list: &[String]) -> Self {
        match list {
            [only] if only.trim() == MATCH_ALL => Self::All,
            _ => Self::Only(
                list.iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
        }
    }

    pub fn admits(&self, repository: &Repository) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(&repository.qualified_slug()),
        }
    }

    /// True when no repository can ever be admitted.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(names) if names.is_empty())
    }
}

/// Create a gauge family in the exporter namespace.
///
/// # Errors
///
/// Returns an error if the name, help or labels are rejected by `prometheus`.
pub fn gauge_vec(subsystem: &str, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
    let opts = Opts::new(name, help).namespace(NAMESPACE).subsystem(subsystem);
    GaugeVec::new(opts, labels).with_context(|| format!("invalid metric {NAMESPACE}_{subsystem}_{name}"))
}

/// Render a flag the way label values are compared in dashboards.
pub const fn bool_label(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
