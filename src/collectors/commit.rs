use crate::cancel::Cancellation;
use crate::client::{
    BitbucketClient, PageWalker,
    models::{Commit, Repository},
};
use crate::collectors::{
    Collector,
    fanout::Subscription,
    holder::Accumulator,
    util::{RepositoryFilter, gauge_vec},
};
use crate::config::{CommitConfig, UserLabelPolicy};
use crate::error::{Error, Result};
use prometheus::{GaugeVec, Registry};
use std::collections::{HashMap, HashSet};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, instrument, warn};
use tracing_futures::Instrument as _;

/// Commit total of one repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepositoryCommits {
    pub workspace: String,
    pub project: String,
    pub repository: String,
    pub total: u64,
}

/// Commit total of one author across every walked repository.
///
/// The descriptive fields come from the commit selected by the
/// [`UserLabelPolicy`]; the total is the sum of the per-repository counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserCommits {
    pub workspace: String,
    pub project: String,
    pub repository: String,
    pub user: String,
    pub user_uuid: String,
    per_repository: HashMap<String, u64>,
}

impl UserCommits {
    pub fn total(&self) -> u64 {
        self.per_repository.values().sum()
    }

    fn describe(&mut self, repository: &Repository, uuid: &str, name: &str) {
        self.workspace.clone_from(&repository.workspace.slug);
        self.project = repository.project_key().to_string();
        self.repository.clone_from(&repository.slug);
        self.user = name.to_string();
        self.user_uuid = uuid.to_string();
    }
}

/// Which totals are accumulated, and how user labels are chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitOptions {
    pub repository_totals: bool,
    pub user_totals: bool,
    pub user_labels: UserLabelPolicy,
}

impl From<&CommitConfig> for CommitOptions {
    fn from(config: &CommitConfig) -> Self {
        Self {
            repository_totals: config.collect_total_commit_repo,
            user_totals: config.collect_total_commit_user,
            user_labels: config.user_labels,
        }
    }
}

/// Repository-scoped and user-scoped commit totals.
///
/// The two maps sit behind separate locks and are never locked together.
#[derive(Clone, Debug, Default)]
pub struct CommitTotals {
    repositories: Accumulator<HashMap<String, RepositoryCommits>>,
    users: Accumulator<HashMap<String, UserCommits>>,
}

impl CommitTotals {
    /// Start a fresh walk of `repository`: its total restarts at zero and the
    /// contributions it made to user totals are withdrawn.
    pub fn begin(&self, repository: &Repository, options: CommitOptions) {
        let key = repository.key();

        if options.repository_totals {
            self.repositories.update(|repositories| {
                repositories.insert(
                    key.to_string(),
                    RepositoryCommits {
                        workspace: repository.workspace.slug.clone(),
                        project: repository.project_key().to_string(),
                        repository: repository.slug.clone(),
                        total: 0,
                    },
                );
            });
        }

        if options.user_totals {
            self.users.update(|users| {
                for user in users.values_mut() {
                    user.per_repository.remove(key);
                }
                users.retain(|_, user| !user.per_repository.is_empty());
            });
        }
    }

    /// Account one page of `repository`'s history.
    pub fn record_page(&self, repository: &Repository, commits: &[Commit], options: CommitOptions) {
        let key = repository.key();

        if options.repository_totals {
            self.repositories.update(|repositories| {
                if let Some(entry) = repositories.get_mut(key) {
                    entry.total += commits.len() as u64;
                }
            });
        }

        if options.user_totals {
            self.users.update(|users| {
                for commit in commits {
                    let (uuid, name) = commit.author.identity();

                    let user = users.entry(uuid.to_string()).or_insert_with(|| {
                        let mut user = UserCommits::default();
                        user.describe(repository, uuid, name);
                        user
                    });

                    if options.user_labels == UserLabelPolicy::LastSeen {
                        user.describe(repository, uuid, name);
                    }

                    *user.per_repository.entry(key.to_string()).or_default() += 1;
                }
            });
        }
    }

    pub fn repository_total(&self, repository_key: &str) -> Option<u64> {
        self.repositories
            .read(|repositories| repositories.get(repository_key).map(|entry| entry.total))
    }

    pub fn user(&self, user_uuid: &str) -> Option<UserCommits> {
        self.users.read(|users| users.get(user_uuid).cloned())
    }
}

/// Walks the full commit history of every admitted repository.
#[derive(Clone)]
pub struct CommitCollector {
    client: BitbucketClient,
    config: Option<CommitConfig>,
    totals: CommitTotals,
    commit_total: GaugeVec,
    user_total: GaugeVec,
}

impl CommitCollector {
    /// # Errors
    ///
    /// Returns an error if the metric families cannot be created
    pub fn new(client: BitbucketClient, config: Option<CommitConfig>) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            config,
            totals: CommitTotals::default(),
            commit_total: gauge_vec(
                "commit",
                "total",
                "Number of commits of a repository",
                &["workspace", "project", "repository"],
            )?,
            user_total: gauge_vec(
                "member",
                "total_commit",
                "Number of commits of a user across the walked repositories",
                &["workspace", "project", "repository", "user", "user_uuid"],
            )?,
        })
    }

    pub const fn totals(&self) -> &CommitTotals {
        &self.totals
    }

    /// Consume repositories until the producer closes the fan-out, walking the
    /// history of each admitted one in its own task.
    ///
    /// A failing page stops only that repository's walk; the pages already
    /// accounted stay. Every task is awaited and the first error is returned.
    ///
    /// # Errors
    ///
    /// `Error::Config` without a commit configuration, otherwise the first
    /// error of any walk.
    #[instrument(skip_all, level = "info", err, fields(collector = "commit"))]
    pub async fn exec(&self, mut repositories: Subscription<Repository>, cancel: Cancellation) -> Result<()> {
        let Some(config) = self.config.as_ref() else {
            return Err(Error::config(self.name(), "no commit configuration block"));
        };

        let filter = RepositoryFilter::from_list(&config.included_repositories);
        let options = CommitOptions::from(config);

        if filter.is_empty() || !(options.repository_totals || options.user_totals) {
            debug!("no repositories or totals configured, nothing to do");
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();

        while let Some(repository) = repositories.recv().await {
            if !filter.admits(&repository) {
                continue;
            }

            // A repository listed on two pages must not be walked twice.
            if !seen.insert(repository.key().to_string()) {
                debug!(repository = %repository.qualified_slug(), "already walked this cycle");
                continue;
            }

            let client = self.client.clone();
            let totals = self.totals.clone();
            let cancel = cancel.clone();
            let span = info_span!("commit.walk", repository = %repository.qualified_slug());

            tasks.spawn(
                async move { walk_history(&client, &totals, &repository, options, cancel).await }.instrument(span),
            );
        }

        let mut first_error = None;
        let mut walked = 0_usize;

        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok(Ok(())) => {
                    walked += 1;
                    continue;
                }
                Ok(Err(err)) => err,
                Err(source) => Error::Task {
                    collector: self.name(),
                    source,
                },
            };
            warn!(error = %error, "commit walk failed");
            first_error.get_or_insert(error);
        }

        info!(walked, "commit histories walked");

        first_error.map_or(Ok(()), Err)
    }
}

async fn walk_history(
    client: &BitbucketClient,
    totals: &CommitTotals,
    repository: &Repository,
    options: CommitOptions,
    cancel: Cancellation,
) -> Result<()> {
    totals.begin(repository, options);

    let mut walker: PageWalker<'_, Commit> = PageWalker::new(
        client,
        format!("repositories/{}/commits", repository.qualified_slug()),
        cancel,
    );

    while let Some(page) = walker.next_page().await? {
        totals.record_page(repository, &page.values, options);
    }

    debug!(requests = walker.requests(), "history walked");
    Ok(())
}

impl Collector for CommitCollector {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn register_metrics(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.commit_total.clone()))?;
        registry.register(Box::new(self.user_total.clone()))?;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn refresh(&self) {
        self.commit_total.reset();
        self.user_total.reset();

        self.totals.repositories.read(|repositories| {
            for entry in repositories.values() {
                self.commit_total
                    .with_label_values(&[
                        entry.workspace.as_str(),
                        entry.project.as_str(),
                        entry.repository.as_str(),
                    ])
                    .set(entry.total as f64);
            }
        });

        self.totals.users.read(|users| {
            for user in users.values() {
                self.user_total
                    .with_label_values(&[
                        user.workspace.as_str(),
                        user.project.as_str(),
                        user.repository.as_str(),
                        user.user.as_str(),
                        user.user_uuid.as_str(),
                    ])
                    .set(user.total() as f64);
            }
        });
    }
}
