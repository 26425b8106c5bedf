//! Maintainer loop and election
//!
//! One node per cluster runs periodic maintenance: quota enforcement and
//! rebalance triggering. Election is a naming convention, not consensus:
//! exactly one node name matches per cluster. Known limitation: if the
//! designated node is absent the cluster has no maintainer, which is
//! acceptable because every action here is idempotent and safe to skip.

use crate::client::ClusterAdmin;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::metrics;
use crate::types::Node;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name of the node designated to run maintenance for the given cluster
pub fn maintainer_node(cluster_name: &str) -> String {
    format!("{cluster_name}-data-0")
}

/// Whether the given node is the cluster's maintainer. Comparison is exact;
/// the cluster name is normalized once at configuration time.
pub fn is_maintainer(cluster_name: &str, node_name: &str) -> bool {
    maintainer_node(cluster_name) == node_name
}

pub struct MaintainerLoop {
    config: WardenConfig,
    client: Arc<dyn ClusterAdmin>,
    /// Sorted OTP identifiers of newly-joined nodes, as of the last cycle
    inactive_added: Vec<String>,
    /// When `inactive_added` last changed
    inactive_changed_at: Instant,
}

impl MaintainerLoop {
    pub fn new(config: WardenConfig, client: Arc<dyn ClusterAdmin>) -> Self {
        Self {
            config,
            client,
            inactive_added: Vec::new(),
            inactive_changed_at: Instant::now(),
        }
    }

    /// Enforce the configured quota policy on the cluster. The client only
    /// issues updates for dimensions that differ and invalidates its node
    /// snapshot when it does.
    pub async fn check_memory(&self) -> Result<()> {
        self.client
            .set_memory_quotas(self.config.data_quota_mb(), self.config.index_quota_mb())
            .await
    }

    fn partition_membership(nodes: &[Node]) -> (Vec<String>, Vec<String>) {
        let mut active = Vec::new();
        let mut inactive_added = Vec::new();
        for node in nodes {
            if node.is_active() {
                active.push(node.otp_node.clone());
            } else if node.is_inactive_added() {
                inactive_added.push(node.otp_node.clone());
            }
        }
        (active, inactive_added)
    }

    /// Trigger a rebalance once the set of newly-joined nodes has been
    /// stable for the debounce window. Waiting for the join wave to settle
    /// avoids a rebalance storm while nodes trickle in.
    pub async fn check_rebalance(&mut self) -> Result<()> {
        let nodes = self.client.nodes().await?;
        let (active, mut inactive_added) = Self::partition_membership(&nodes);

        inactive_added.sort();
        if inactive_added != self.inactive_added {
            debug!(nodes = ?inactive_added, "pending node set changed");
            self.inactive_added = inactive_added;
            self.inactive_changed_at = Instant::now();
        }

        let stable_for = self.inactive_changed_at.elapsed();
        if !self.inactive_added.is_empty() && stable_for > self.config.rebalance_debounce() {
            let mut known_nodes = active;
            known_nodes.extend(self.inactive_added.iter().cloned());

            info!(known = ?known_nodes, "pending nodes settled, rebalancing");
            self.client.rebalance(&known_nodes, &[]).await?;
            metrics::record_rebalance_trigger(known_nodes.len());
            self.inactive_added.clear();
        }

        Ok(())
    }

    /// One maintenance cycle. The two checks are independent; one failing
    /// does not abort the other.
    pub async fn periodic_check(&mut self) {
        if let Err(err) = self.check_memory().await {
            metrics::record_loop_error("maintainer", err.error_type());
            warn!(error = %err, "checking memory quota failed");
        }
        if let Err(err) = self.check_rebalance().await {
            metrics::record_loop_error("maintainer", err.error_type());
            warn!(error = %err, "checking for rebalance operation failed");
        }
    }

    /// Run until cancelled. The maintainer predicate is re-evaluated every
    /// cycle so a renamed or rescheduled node picks up the role change.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            maintainer = %maintainer_node(&self.config.cluster_name),
            "maintainer loop starting"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !is_maintainer(&self.config.cluster_name, &self.config.node_name) {
                continue;
            }
            metrics::record_loop_iteration("maintainer");
            self.periodic_check().await;
        }
        info!("maintainer loop stopping");
    }
}
