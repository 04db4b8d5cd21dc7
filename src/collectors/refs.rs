use crate::cancel::Cancellation;
use crate::client::{
    BitbucketClient,
    models::{RefKind, Repository},
};
use crate::collectors::{
    Collector,
    fanout::Subscription,
    holder::Accumulator,
    util::{RepositoryFilter, gauge_vec},
};
use crate::config::RefsConfig;
use crate::error::{Error, Result};
use prometheus::{GaugeVec, Registry};
use std::collections::{HashMap, HashSet};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, instrument, warn};
use tracing_futures::Instrument as _;

const LABELS: &[&str] = &["workspace", "project", "repository"];

/// Ref count of one repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefsEntry {
    pub workspace: String,
    pub project: String,
    pub repository: String,
    pub total: u64,
}

impl RefsEntry {
    fn new(repository: &Repository, total: u64) -> Self {
        Self {
            workspace: repository.workspace.slug.clone(),
            project: repository.project_key().to_string(),
            repository: repository.slug.clone(),
            total,
        }
    }
}

/// Counts branches and tags of every admitted repository.
#[derive(Clone)]
pub struct RefsCollector {
    client: BitbucketClient,
    config: Option<RefsConfig>,
    branches: Accumulator<HashMap<String, RefsEntry>>,
    tags: Accumulator<HashMap<String, RefsEntry>>,
    total_branch: GaugeVec,
    total_tag: GaugeVec,
}

impl RefsCollector {
    /// # Errors
    ///
    /// Returns an error if the metric families cannot be created
    pub fn new(client: BitbucketClient, config: Option<RefsConfig>) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            config,
            branches: Accumulator::default(),
            tags: Accumulator::default(),
            total_branch: gauge_vec(
                "repository_refs",
                "total_branch",
                "Number of branches of a repository",
                LABELS,
            )?,
            total_tag: gauge_vec(
                "repository_refs",
                "total_tag",
                "Number of tags of a repository",
                LABELS,
            )?,
        })
    }

    fn store(&self, kind: RefKind) -> &Accumulator<HashMap<String, RefsEntry>> {
        match kind {
            RefKind::Branch => &self.branches,
            RefKind::Tag => &self.tags,
        }
    }

    /// Consume repositories until the producer closes the fan-out.
    ///
    /// Every admitted repository gets one count-only read per enabled ref
    /// kind, each in its own task. A repository seen twice in one cycle is
    /// counted once. All tasks are awaited before returning; a
    /// failed read only loses that repository's entry for that kind and the
    /// first such error is returned.
    ///
    /// # Errors
    ///
    /// `Error::Config` without a refs configuration, otherwise the first error
    /// of any read.
    #[instrument(skip_all, level = "info", err, fields(collector = "refs"))]
    pub async fn exec(&self, mut repositories: Subscription<Repository>, cancel: Cancellation) -> Result<()> {
        let Some(config) = self.config.as_ref() else {
            return Err(Error::config(self.name(), "no refs configuration block"));
        };

        let filter = RepositoryFilter::from_list(&config.included_repositories);

        let kinds: Vec<RefKind> = [
            (RefKind::Branch, config.collect_total_branch),
            (RefKind::Tag, config.collect_total_tag),
        ]
        .into_iter()
        .filter_map(|(kind, enabled)| enabled.then_some(kind))
        .collect();

        if filter.is_empty() || kinds.is_empty() {
            debug!("no repositories or ref kinds configured, nothing to do");
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();

        while let Some(repository) = repositories.recv().await {
            if !filter.admits(&repository) {
                continue;
            }

            if !seen.insert(repository.key().to_string()) {
                debug!(repository = %repository.qualified_slug(), "already counted this cycle");
                continue;
            }

            for &kind in &kinds {
                let client = self.client.clone();
                let store = self.store(kind).clone();
                let repository = repository.clone();
                let cancel = cancel.clone();
                let span = info_span!("refs.count", repository = %repository.qualified_slug(), kind = kind.as_str());

                tasks.spawn(
                    async move {
                        if let Some(total) = count_refs(&client, &repository, kind, cancel).await? {
                            store.update(|entries| {
                                entries.insert(repository.key().to_string(), RefsEntry::new(&repository, total));
                            });
                        }
                        Ok::<_, Error>(())
                    }
                    .instrument(span),
                );
            }
        }

        let mut first_error = None;
        let mut completed = 0_usize;

        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok(Ok(())) => {
                    completed += 1;
                    continue;
                }
                Ok(Err(err)) => err,
                Err(source) => Error::Task {
                    collector: self.name(),
                    source,
                },
            };
            warn!(error = %error, "ref count failed");
            first_error.get_or_insert(error);
        }

        info!(completed, "ref counts collected");

        first_error.map_or(Ok(()), Err)
    }

    /// Counted entries of `kind`, for inspection.
    pub fn entries(&self, kind: RefKind) -> Vec<RefsEntry> {
        self.store(kind).read(|entries| entries.values().cloned().collect())
    }
}

/// `size` of `repositories/{workspace}/{slug}/refs?q=type="<kind>"`, or
/// `None` when cancelled first.
async fn count_refs(
    client: &BitbucketClient,
    repository: &Repository,
    kind: RefKind,
    mut cancel: Cancellation,
) -> Result<Option<u64>> {
    let endpoint = format!("repositories/{}/refs", repository.qualified_slug());
    let query = format!("type=\"{}\"", kind.as_str());
    let params = [("q", query.as_str())];

    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(None),
        total = client.count(&endpoint, &params) => total.map(Some),
    }
}

impl Collector for RefsCollector {
    fn name(&self) -> &'static str {
        "refs"
    }

    fn register_metrics(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.total_branch.clone()))?;
        registry.register(Box::new(self.total_tag.clone()))?;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn refresh(&self) {
        for (kind, gauge) in [(RefKind::Branch, &self.total_branch), (RefKind::Tag, &self.total_tag)] {
            gauge.reset();
            self.store(kind).read(|entries| {
                for entry in entries.values() {
                    gauge
                        .with_label_values(&[
                            entry.workspace.as_str(),
                            entry.project.as_str(),
                            entry.repository.as_str(),
                        ])
                        .set(entry.total as f64);
                }
            });
        }
    }
}
