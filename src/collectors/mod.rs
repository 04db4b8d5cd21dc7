use anyhow::Result;
use prometheus::Registry;

/// Read side of a sub-collector.
///
/// Ingestion is an inherent `exec` on each sub-collector because their inputs
/// differ; what they share is how their accumulated state reaches a scrape.
pub trait Collector {
    fn name(&self) -> &'static str;

    /// Register the families this collector owns with the prometheus registry
    fn register_metrics(&self, registry: &Registry) -> Result<()>;

    /// Rewrite the registered families from the accumulated state.
    /// Runs on the scrape path and never touches the network.
    fn refresh(&self);
}

/// Sub-collectors selectable with `--collector.<name>` / `--no-collector.<name>`.
pub const COLLECTOR_NAMES: &[&str] = &["repositories", "refs", "commit", "member"];

pub mod commit;
pub mod config;
pub mod fanout;
pub mod holder;
pub mod member;
pub mod refs;
pub mod registry;
pub mod repositories;
pub mod scraper;
pub mod util;

pub use commit::CommitCollector;
pub use member::MemberCollector;
pub use refs::RefsCollector;
pub use repositories::RepositoriesCollector;
