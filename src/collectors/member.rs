use crate::cancel::Cancellation;
use crate::client::BitbucketClient;
use crate::collectors::{Collector, holder::Accumulator, util::gauge_vec};
use crate::error::Result;
use prometheus::{GaugeVec, Registry};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, instrument};

/// Minimum delay between two member-count requests.
pub const MEMBER_REQUEST_PAUSE: Duration = Duration::from_secs(5);

/// Member count of every configured workspace.
#[derive(Clone)]
pub struct MemberCollector {
    client: BitbucketClient,
    workspaces: Arc<[String]>,
    members: Accumulator<HashMap<String, u64>>,
    member_total: GaugeVec,
}

impl MemberCollector {
    /// # Errors
    ///
    /// Returns an error if the metric family cannot be created
    pub fn new(client: BitbucketClient, workspaces: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            workspaces: Arc::from(workspaces),
            members: Accumulator::default(),
            member_total: gauge_vec("member", "total", "Number of members of a workspace", &["workspace"])?,
        })
    }

    /// Fetch the reported member count of each workspace and replace the
    /// stored value. Consecutive requests are at least `MEMBER_REQUEST_PAUSE`
    /// apart. Cancellation ends the run early without an error.
    ///
    /// # Errors
    ///
    /// The first failed request; the remaining workspaces are skipped.
    #[instrument(skip_all, level = "info", err, fields(collector = "member"))]
    pub async fn exec(&self, mut cancel: Cancellation) -> Result<()> {
        for (index, workspace) in self.workspaces.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(()),
                    () = sleep(MEMBER_REQUEST_PAUSE) => {}
                }
            }

            let endpoint = format!("workspaces/{workspace}/members");
            let params: [(&str, &str); 0] = [];
            let total = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                total = self.client.count(&endpoint, &params) => total?,
            };

            debug!(workspace = %workspace, total, "workspace members counted");

            self.members.update(|members| {
                members.insert(workspace.clone(), total);
            });
        }

        Ok(())
    }

    pub fn total(&self, workspace: &str) -> Option<u64> {
        self.members.read(|members| members.get(workspace).copied())
    }
}

impl Collector for MemberCollector {
    fn name(&self) -> &'static str {
        "member"
    }

    fn register_metrics(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.member_total.clone()))?;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn refresh(&self) {
        self.member_total.reset();
        self.members.read(|members| {
            for (workspace, total) in members {
                self.member_total
                    .with_label_values(&[workspace.as_str()])
                    .set(*total as f64);
            }
        });
    }
}
