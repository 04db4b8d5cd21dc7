use crate::collectors::COLLECTOR_NAMES;
use std::collections::HashSet;

/// Set of enabled sub-collectors.
#[derive(Clone, Debug, Default)]
pub struct CollectorConfig {
    pub enabled_collectors: HashSet<String>,
}

impl CollectorConfig {
    /// Create an empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Every known sub-collector enabled
    pub fn all() -> Self {
        Self {
            enabled_collectors: COLLECTOR_NAMES.iter().map(ToString::to_string).collect(),
        }
    }

    /// Enable collectors by name
    #[must_use]
    pub fn with_enabled(mut self, collectors: &[String]) -> Self {
        self.enabled_collectors = collectors.iter().cloned().collect();
        self
    }

    /// Check if a collector is enabled
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled_collectors.contains(name)
    }

    /// Whether the repository producer has to run: the refs and commit
    /// collectors depend on what it discovers.
    pub fn needs_repositories(&self) -> bool {
        ["repositories", "refs", "commit"]
            .iter()
            .any(|name| self.is_enabled(name))
    }
}
