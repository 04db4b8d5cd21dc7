use crate::collectors::util::NAMESPACE;
use anyhow::Result;
use prometheus::{CounterVec, GaugeVec, IntCounter, Opts, Registry};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Tracks how each sub-collector's last run went.
///
/// # Metrics Exported
///
/// - `bitbucket_scrape_collector_duration_seconds{collector}` (Gauge)
///   - Wall-clock duration of the last run, recorded for successes and failures alike
///
/// - `bitbucket_scrape_collector_success{collector}` (Gauge)
///   - 1 = last run succeeded, 0 = failed
///
/// - `bitbucket_scrape_collector_errors_total{collector}` (Counter)
///   - Failed runs since start
///   - Example: `rate(bitbucket_scrape_collector_errors_total[1h]) > 0`
///
/// - `bitbucket_scrape_collector_last_run_timestamp_seconds{collector}` (Gauge)
///   - Unix timestamp of the last run; detects a stuck collection loop
///   - Example: `time() - bitbucket_scrape_collector_last_run_timestamp_seconds > 900`
///
/// - `bitbucket_exporter_collection_cycles_total` (Counter)
///   - Collection cycles started since start
///
/// These are rewritten on every run and are independent of what the
/// sub-collector's own families report.
///
/// # Usage Pattern with `ScrapeTimer`
///
/// ```no_run
/// # use bitbucket_exporter::collectors::scraper::ScraperCollector;
/// # async fn example() -> anyhow::Result<()> {
/// let scraper = ScraperCollector::new()?;
///
/// let timer = scraper.start_scrape("member");
/// match collect_members().await {
///     Ok(()) => timer.success(),
///     Err(_) => timer.error(),
/// };
/// # Ok(())
/// # }
/// # async fn collect_members() -> anyhow::Result<()> { Ok(()) }
/// ```
///
/// A timer dropped without an outcome (the run was aborted) counts as a failure.
#[derive(Clone)]
pub struct ScraperCollector {
    duration_seconds: GaugeVec,
    success: GaugeVec,
    errors_total: CounterVec,
    last_run_timestamp: GaugeVec,
    cycles_total: IntCounter,
}

impl ScraperCollector {
    /// # Errors
    ///
    /// Returns an error if metric creation fails
    pub fn new() -> Result<Self> {
        let duration_seconds = GaugeVec::new(
            Opts::new(
                "collector_duration_seconds",
                "Duration of the last run of each collector in seconds",
            )
            .namespace(NAMESPACE)
            .subsystem("scrape"),
            &["collector"],
        )?;

        let success = GaugeVec::new(
            Opts::new(
                "collector_success",
                "Whether the last run of each collector succeeded (1=success, 0=failure)",
            )
            .namespace(NAMESPACE)
            .subsystem("scrape"),
            &["collector"],
        )?;

        let errors_total = CounterVec::new(
            Opts::new("collector_errors_total", "Total number of failed runs per collector")
                .namespace(NAMESPACE)
                .subsystem("scrape"),
            &["collector"],
        )?;

        let last_run_timestamp = GaugeVec::new(
            Opts::new(
                "collector_last_run_timestamp_seconds",
                "Unix timestamp of the last run per collector",
            )
            .namespace(NAMESPACE)
            .subsystem("scrape"),
            &["collector"],
        )?;

        let cycles_total = IntCounter::with_opts(
            Opts::new("collection_cycles_total", "Total number of collection cycles started")
                .namespace(NAMESPACE)
                .subsystem("exporter"),
        )?;

        Ok(Self {
            duration_seconds,
            success,
            errors_total,
            last_run_timestamp,
            cycles_total,
        })
    }

    /// Record the start of a collector run
    #[must_use]
    pub fn start_scrape(&self, collector_name: &'static str) -> ScrapeTimer {
        ScrapeTimer {
            collector_name,
            start: Instant::now(),
            scraper: self.clone(),
            recorded: false,
        }
    }

    pub fn increment_cycles(&self) {
        self.cycles_total.inc();
    }

    pub fn cycles(&self) -> u64 {
        self.cycles_total.get()
    }

    fn record(&self, collector_name: &str, duration: Duration, succeeded: bool) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        self.duration_seconds
            .with_label_values(&[collector_name])
            .set(duration.as_secs_f64());

        self.last_run_timestamp
            .with_label_values(&[collector_name])
            .set(timestamp);

        self.success
            .with_label_values(&[collector_name])
            .set(if succeeded { 1.0 } else { 0.0 });

        if !succeeded {
            self.errors_total.with_label_values(&[collector_name]).inc();
        }
    }

    /// Register all metrics with the registry
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.duration_seconds.clone()))?;
        registry.register(Box::new(self.success.clone()))?;
        registry.register(Box::new(self.errors_total.clone()))?;
        registry.register(Box::new(self.last_run_timestamp.clone()))?;
        registry.register(Box::new(self.cycles_total.clone()))?;
        Ok(())
    }
}

/// RAII timer for one collector run
///
/// Records duration and outcome exactly once: on `success()`, on `error()`,
/// or as a failure when dropped without either.
pub struct ScrapeTimer {
    collector_name: &'static str,
    start: Instant,
    scraper: ScraperCollector,
    recorded: bool,
}

impl ScrapeTimer {
    /// Mark the run as successful and return its duration
    pub fn success(mut self) -> Duration {
        self.finish(true)
    }

    /// Mark the run as failed and return its duration
    pub fn error(mut self) -> Duration {
        self.finish(false)
    }

    fn finish(&mut self, succeeded: bool) -> Duration {
        let elapsed = self.start.elapsed();
        if !self.recorded {
            self.recorded = true;
            self.scraper.record(self.collector_name, elapsed, succeeded);
        }
        elapsed
    }
}

impl Drop for ScrapeTimer {
    fn drop(&mut self) {
        self.finish(false);
    }
}
