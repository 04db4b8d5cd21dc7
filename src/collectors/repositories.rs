use crate::cancel::Cancellation;
use crate::client::{BitbucketClient, PageWalker, models::Repository};
use crate::collectors::{
    Collector,
    fanout::FanOut,
    holder::Accumulator,
    util::{bool_label, gauge_vec},
};
use crate::error::Result;
use prometheus::{GaugeVec, Registry};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, instrument};

/// Delay between two page requests of one workspace listing.
pub const REPOSITORY_PAGE_PAUSE: Duration = Duration::from_secs(1);

const LABELS: &[&str] = &[
    "workspace",
    "project",
    "name",
    "language",
    "has_issues",
    "has_wiki",
    "is_private",
];

/// Enumerates the repositories of each configured workspace and hands every
/// one of them to the downstream consumers.
#[derive(Clone)]
pub struct RepositoriesCollector {
    client: BitbucketClient,
    workspaces: Arc<[String]>,
    repositories: Accumulator<HashMap<String, Repository>>,
    info: GaugeVec,
    created_on: GaugeVec,
    updated_on: GaugeVec,
    size: GaugeVec,
}

impl RepositoriesCollector {
    /// # Errors
    ///
    /// Returns an error if the metric families cannot be created
    pub fn new(client: BitbucketClient, workspaces: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            workspaces: Arc::from(workspaces),
            repositories: Accumulator::default(),
            info: gauge_vec("repositories", "info", "Repository metadata, always 1", LABELS)?,
            created_on: gauge_vec(
                "repositories",
                "created_on",
                "Repository creation time as a unix timestamp",
                LABELS,
            )?,
            updated_on: gauge_vec(
                "repositories",
                "updated_on",
                "Repository last update time as a unix timestamp",
                LABELS,
            )?,
            size: gauge_vec("repositories", "size", "Repository size in bytes", LABELS)?,
        })
    }

    /// Walk `repositories/{workspace}` for every workspace.
    ///
    /// Each page is stored and then published to `fanout` before the next page
    /// is requested, `REPOSITORY_PAGE_PAUSE` later. The first failure aborts
    /// the remaining pages and workspaces; what was already stored and
    /// published stays valid. The fan-out is closed on every exit path.
    ///
    /// # Errors
    ///
    /// Transport, decode or pagination errors of the walk.
    #[instrument(skip_all, level = "info", err, fields(collector = "repositories"))]
    pub async fn exec(&self, mut fanout: FanOut<Repository>, mut cancel: Cancellation) -> Result<()> {
        for workspace in self.workspaces.iter() {
            let mut walker: PageWalker<'_, Repository> =
                PageWalker::new(&self.client, format!("repositories/{workspace}"), cancel.clone())
                    .param("role", "member")
                    .param("sort", "-created_on");

            let mut discovered = 0_usize;
            while let Some(page) = walker.next_page().await? {
                self.repositories.update(|repositories| {
                    for repository in &page.values {
                        repositories.insert(repository.key().to_string(), repository.clone());
                    }
                });

                for repository in &page.values {
                    fanout.publish(repository).await;
                }
                discovered += page.values.len();

                if walker.has_next() {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = sleep(REPOSITORY_PAGE_PAUSE) => {}
                    }
                }
            }

            info!(workspace = %workspace, repositories = discovered, requests = walker.requests(), "workspace enumerated");
        }

        debug!(consumers = fanout.consumers(), "closing repository fan-out");
        fanout.close();
        Ok(())
    }

}

impl Collector for RepositoriesCollector {
    fn name(&self) -> &'static str {
        "repositories"
    }

    fn register_metrics(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.info.clone()))?;
        registry.register(Box::new(self.created_on.clone()))?;
        registry.register(Box::new(self.updated_on.clone()))?;
        registry.register(Box::new(self.size.clone()))?;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn refresh(&self) {
        self.info.reset();
        self.created_on.reset();
        self.updated_on.reset();
        self.size.reset();

        self.repositories.read(|repositories| {
            for repository in repositories.values() {
                let labels = [
                    repository.workspace.slug.as_str(),
                    repository.project_key(),
                    repository.name.as_str(),
                    repository.language.as_str(),
                    bool_label(repository.has_issues),
                    bool_label(repository.has_wiki),
                    bool_label(repository.is_private),
                ];

                self.info.with_label_values(&labels).set(1.0);
                self.created_on
                    .with_label_values(&labels)
                    .set(repository.created_on.timestamp() as f64);
                self.updated_on
                    .with_label_values(&labels)
                    .set(repository.updated_on.timestamp() as f64);
                self.size.with_label_values(&labels).set(repository.size as f64);
            }
        });
    }
}
