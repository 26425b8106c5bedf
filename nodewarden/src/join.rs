//! Join coordinator
//!
//! A repeating task that ensures the local node is initialized and has
//! joined the target cluster. Every cycle re-derives intent from remote
//! state; nothing about membership is persisted locally.

use crate::client::ClusterAdmin;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::metrics;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct JoinCoordinator {
    config: WardenConfig,
    local: Arc<dyn ClusterAdmin>,
    cluster: Arc<dyn ClusterAdmin>,
}

impl JoinCoordinator {
    pub fn new(
        config: WardenConfig,
        local: Arc<dyn ClusterAdmin>,
        cluster: Arc<dyn ClusterAdmin>,
    ) -> Self {
        Self {
            config,
            local,
            cluster,
        }
    }

    /// One reconciliation cycle: initialize the local node if it reports
    /// uninitialized, then make sure it is a member of the cluster.
    pub async fn check_node(&self) -> Result<()> {
        match self.local.connect().await {
            Ok(()) => {}
            Err(err) if err.is_uninitialized() => {
                // Only the explicit uninitialized signal starts
                // initialization; ambiguous failures are retried as-is.
                info!("initializing local node");
                self.local
                    .set_hostname(&self.config.node_name)
                    .await?;
                self.local.set_services(&self.config.services).await?;
                self.local.setup_auth().await?;
            }
            Err(err) => return Err(err),
        }

        self.cluster.connect().await?;

        let nodes = self.cluster.nodes().await?;
        let advertised = self.config.advertised_hostname();
        if nodes.iter().any(|n| n.hostname == advertised) {
            // already joined
            return Ok(());
        }

        info!(node = %self.config.node_name, "joining cluster");
        self.cluster
            .add_node(
                &self.config.node_name,
                &self.config.username,
                &self.config.password,
                &self.config.services,
            )
            .await
    }

    /// Run until cancelled, one cycle per poll interval. Errors are logged
    /// at the loop boundary and never escape.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("join coordinator starting");
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            metrics::record_loop_iteration("join");
            if let Err(err) = self.check_node().await {
                metrics::record_loop_error("join", err.error_type());
                warn!(error = %err, "problem checking node");
            }
        }
        info!("join coordinator stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeAdmin;

    fn config() -> WardenConfig {
        WardenConfig {
            cluster_name: "db".into(),
            node_name: "db-data-1".into(),
            cluster_url: "http://db-data-0:8091".into(),
            username: "admin".into(),
            password: "secret".into(),
            ..WardenConfig::default()
        }
        .finalize()
        .unwrap()
    }

    #[tokio::test]
    async fn test_uninitialized_node_is_initialized_in_order() {
        let local = Arc::new(FakeAdmin::default());
        local.fail_connect_uninitialized();
        let cluster = Arc::new(FakeAdmin::default());

        let coordinator = JoinCoordinator::new(config(), local.clone(), cluster.clone());
        coordinator.check_node().await.unwrap();

        assert_eq!(
            local.calls(),
            vec!["connect", "set_hostname", "set_services", "setup_auth"]
        );
        // no member matches the advertised hostname, so a join is requested
        assert_eq!(cluster.calls(), vec!["connect", "nodes", "add_node"]);
    }

    #[tokio::test]
    async fn test_already_joined_is_noop() {
        let local = Arc::new(FakeAdmin::default());
        let cluster = Arc::new(FakeAdmin::default());
        cluster.push_node("db-data-1:8091", "ns_1@db-data-1", "active");

        let coordinator = JoinCoordinator::new(config(), local, cluster.clone());
        coordinator.check_node().await.unwrap();

        assert_eq!(cluster.calls(), vec!["connect", "nodes"]);
    }

    #[tokio::test]
    async fn test_cluster_unreachable_does_not_reinitialize() {
        let local = Arc::new(FakeAdmin::default());
        let cluster = Arc::new(FakeAdmin::default());
        cluster.fail_connect_transport();

        let coordinator = JoinCoordinator::new(config(), local.clone(), cluster);
        let err = coordinator.check_node().await.unwrap_err();

        assert_eq!(err.error_type(), "transport");
        // the initialized local node must not see initialization calls again
        assert_eq!(local.calls(), vec!["connect"]);
    }

    #[tokio::test]
    async fn test_initialization_failure_aborts_cycle() {
        let local = Arc::new(FakeAdmin::default());
        local.fail_connect_uninitialized();
        local.fail_call("set_services");
        let cluster = Arc::new(FakeAdmin::default());

        let coordinator = JoinCoordinator::new(config(), local.clone(), cluster.clone());
        assert!(coordinator.check_node().await.is_err());

        // auth setup never ran, and the cluster was never contacted
        assert_eq!(
            local.calls(),
            vec!["connect", "set_hostname", "set_services"]
        );
        assert!(cluster.calls().is_empty());
    }
}
