use crate::cancel::Cancellation;
use crate::client::{BitbucketClient, models::Repository};
use crate::collectors::{
    Collector, CommitCollector, MemberCollector, RefsCollector, RepositoriesCollector,
    config::CollectorConfig, fanout::FanOut, scraper::ScraperCollector,
    util::gauge_vec,
};
use crate::config::ExporterConfig;
use crate::exporter::GIT_COMMIT_HASH;
use anyhow::Result;
use prometheus::{Registry, proto::MetricFamily};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, info_span, instrument};
use tracing_futures::Instrument as _;

/// Outcome of one sub-collector run within a cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunOutcome {
    pub collector: &'static str,
    pub success: bool,
    pub duration: Duration,
}

/// Owns the sub-collectors, runs collection cycles and serves their state to scrapes.
#[derive(Clone)]
pub struct CollectorRegistry {
    repositories: Option<RepositoriesCollector>,
    expose_repositories: bool,
    refs: Option<RefsCollector>,
    commit: Option<CommitCollector>,
    member: Option<MemberCollector>,
    scraper: ScraperCollector,
    // Serializes refresh + gather so concurrent scrapes never see a half-rewritten family.
    scrape: Arc<Mutex<()>>,
}

impl CollectorRegistry {
    /// # Errors
    ///
    /// Returns an error if a metric family cannot be created
    pub fn new(client: &BitbucketClient, config: &ExporterConfig, collectors: &CollectorConfig) -> Result<Self> {
        let workspaces = &config.included_workspaces;

        let repositories = if collectors.needs_repositories() {
            Some(RepositoriesCollector::new(client.clone(), workspaces)?)
        } else {
            None
        };

        let refs = if collectors.is_enabled("refs") {
            Some(RefsCollector::new(client.clone(), config.refs.clone())?)
        } else {
            None
        };

        let commit = if collectors.is_enabled("commit") {
            Some(CommitCollector::new(client.clone(), config.commit.clone())?)
        } else {
            None
        };

        let member = if collectors.is_enabled("member") {
            Some(MemberCollector::new(client.clone(), workspaces)?)
        } else {
            None
        };

        Ok(Self {
            repositories,
            expose_repositories: collectors.is_enabled("repositories"),
            refs,
            commit,
            member,
            scraper: ScraperCollector::new()?,
            scrape: Arc::default(),
        })
    }

    /// Sub-collectors whose families are exposed.
    fn exposed(&self) -> Vec<&dyn Collector> {
        let mut exposed: Vec<&dyn Collector> = Vec::new();
        if self.expose_repositories
            && let Some(repositories) = &self.repositories
        {
            exposed.push(repositories);
        }
        if let Some(refs) = &self.refs {
            exposed.push(refs);
        }
        if let Some(commit) = &self.commit {
            exposed.push(commit);
        }
        if let Some(member) = &self.member {
            exposed.push(member);
        }
        exposed
    }

    /// Names of the sub-collectors that run each cycle.
    pub fn collector_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if let Some(repositories) = &self.repositories {
            names.push(repositories.name());
        }
        names.extend(self.exposed().iter().map(|c| c.name()).filter(|name| *name != "repositories"));
        names
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_none() && self.member.is_none()
    }

    pub fn cycles(&self) -> u64 {
        self.scraper.cycles()
    }

    pub const fn refs(&self) -> Option<&RefsCollector> {
        self.refs.as_ref()
    }

    pub const fn commit(&self) -> Option<&CommitCollector> {
        self.commit.as_ref()
    }

    pub const fn member(&self) -> Option<&MemberCollector> {
        self.member.as_ref()
    }

    /// Register every exposed family, the scrape meta and the build info.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register
    #[instrument(skip(self, registry), level = "info", err)]
    pub fn register_metrics(&self, registry: &Registry) -> Result<()> {
        let build_info = gauge_vec(
            "exporter",
            "build_info",
            "Version and commit the exporter was built from, always 1",
            &["version", "commit"],
        )?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION"), GIT_COMMIT_HASH])
            .set(1.0);
        registry.register(Box::new(build_info))?;

        self.scraper.register(registry)?;

        for collector in self.exposed() {
            collector.register_metrics(registry)?;
            debug!(collector = collector.name(), "registered metrics");
        }

        Ok(())
    }

    /// Rewrite every exposed family from its accumulator and gather the registry.
    pub fn gather(&self, registry: &Registry) -> Vec<MetricFamily> {
        let _guard = self.scrape.lock().unwrap_or_else(PoisonError::into_inner);

        for collector in self.exposed() {
            collector.refresh();
        }
        registry.gather()
    }

    /// Run every enabled sub-collector once, concurrently.
    ///
    /// Refs and commit subscribe to the repository fan-out before the producer
    /// starts. Each run is timed and its outcome recorded; a failure never
    /// affects the other runs. Returns after every run has finished.
    pub async fn run_cycle(&self, cancel: &Cancellation) -> Vec<RunOutcome> {
        self.scraper.increment_cycles();

        let mut fanout: FanOut<Repository> = FanOut::new();
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        if let Some(refs) = &self.refs {
            let (refs, subscription, cancel) = (refs.clone(), fanout.subscribe("refs"), cancel.clone());
            self.spawn_run(&mut tasks, &mut names, "refs", async move {
                refs.exec(subscription, cancel).await
            });
        }

        if let Some(commit) = &self.commit {
            let (commit, subscription, cancel) = (commit.clone(), fanout.subscribe("commit"), cancel.clone());
            self.spawn_run(&mut tasks, &mut names, "commit", async move {
                commit.exec(subscription, cancel).await
            });
        }

        if let Some(repositories) = &self.repositories {
            let (repositories, cancel) = (repositories.clone(), cancel.clone());
            self.spawn_run(&mut tasks, &mut names, "repositories", async move {
                repositories.exec(fanout, cancel).await
            });
        } else {
            fanout.close();
        }

        if let Some(member) = &self.member {
            let (member, cancel) = (member.clone(), cancel.clone());
            self.spawn_run(&mut tasks, &mut names, "member", async move { member.exec(cancel).await });
        }

        let mut outcomes = Vec::with_capacity(names.len());

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(e) => {
                    let collector = names.get(&e.id()).copied().unwrap_or("unknown");
                    error!(collector, error = %e, "collector task did not complete");
                }
            }
        }

        outcomes
    }

    fn spawn_run<F>(
        &self,
        tasks: &mut JoinSet<RunOutcome>,
        names: &mut HashMap<Id, &'static str>,
        collector: &'static str,
        run: F,
    ) where
        F: Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        let timer = self.scraper.start_scrape(collector);
        let span = info_span!("collector.exec", collector, otel.kind = "internal");

        let handle = tasks.spawn(
            async move {
                match run.await {
                    Ok(()) => {
                        let duration = timer.success();
                        debug!(collector, duration_seconds = duration.as_secs_f64(), "collector finished");
                        RunOutcome {
                            collector,
                            success: true,
                            duration,
                        }
                    }
                    Err(e) => {
                        let duration = timer.error();
                        error!(collector, duration_seconds = duration.as_secs_f64(), error = %e, "collector failed");
                        RunOutcome {
                            collector,
                            success: false,
                            duration,
                        }
                    }
                }
            }
            .instrument(span),
        );

        names.insert(handle.id(), collector);
    }

    /// Run cycles until cancelled; one cycle only when `interval` is zero.
    pub async fn run(&self, interval: Duration, mut cancel: Cancellation) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let outcomes = self.run_cycle(&cancel).await;
            let failed = outcomes.iter().filter(|o| !o.success).count();
            info!(cycle = self.cycles(), collectors = outcomes.len(), failed, "collection cycle finished");

            if interval.is_zero() {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        debug!("collection stopped");
    }
}
