//! Test doubles shared by the coordinator tests

use crate::client::ClusterAdmin;
use crate::error::{Result, WardenError};
use crate::types::{Node, RebalanceStatus, Service};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Enumerable failure injected into [`FakeAdmin::connect`]
#[derive(Clone, Copy)]
enum ConnectFailure {
    Uninitialized,
    Transport,
}

/// Scriptable in-memory [`ClusterAdmin`] recording every call
#[derive(Default)]
pub(crate) struct FakeAdmin {
    calls: Mutex<Vec<&'static str>>,
    nodes: Mutex<Vec<Node>>,
    connect_failure: Mutex<Option<ConnectFailure>>,
    failing_calls: Mutex<HashSet<&'static str>>,
    quota_calls: Mutex<Vec<(u64, u64)>>,
    rebalance_calls: Mutex<Vec<(Vec<String>, Vec<String>)>>,
    remove_calls: Mutex<Vec<Vec<String>>>,
    remove_failures_left: Mutex<u32>,
}

impl FakeAdmin {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, name: &'static str) -> Result<()> {
        self.calls.lock().push(name);
        if self.failing_calls.lock().contains(name) {
            return Err(WardenError::Transport(format!("injected failure: {name}")));
        }
        Ok(())
    }

    pub fn fail_call(&self, name: &'static str) {
        self.failing_calls.lock().insert(name);
    }

    pub fn fail_connect_uninitialized(&self) {
        *self.connect_failure.lock() = Some(ConnectFailure::Uninitialized);
    }

    pub fn fail_connect_transport(&self) {
        *self.connect_failure.lock() = Some(ConnectFailure::Transport);
    }

    /// Make the next `count` remove_nodes calls fail
    pub fn fail_remove_times(&self, count: u32) {
        *self.remove_failures_left.lock() = count;
    }

    pub fn push_node(&self, hostname: &str, otp_node: &str, membership: &str) {
        self.nodes.lock().push(Node {
            hostname: hostname.to_string(),
            otp_node: otp_node.to_string(),
            cluster_membership: membership.to_string(),
            status: "healthy".to_string(),
            ..Node::default()
        });
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        *self.nodes.lock() = nodes;
    }

    pub fn set_local(&self, hostname: &str, data_quota: u64, index_quota: u64) {
        self.nodes.lock().push(Node {
            hostname: hostname.to_string(),
            otp_node: format!("ns_1@{hostname}"),
            cluster_membership: "active".to_string(),
            status: "healthy".to_string(),
            this_node: true,
            memory_quota: data_quota,
            index_memory_quota: index_quota,
            ..Node::default()
        });
    }

    pub fn quota_calls(&self) -> Vec<(u64, u64)> {
        self.quota_calls.lock().clone()
    }

    pub fn rebalance_calls(&self) -> Vec<(Vec<String>, Vec<String>)> {
        self.rebalance_calls.lock().clone()
    }

    pub fn remove_calls(&self) -> Vec<Vec<String>> {
        self.remove_calls.lock().clone()
    }
}

#[async_trait]
impl ClusterAdmin for FakeAdmin {
    async fn connect(&self) -> Result<()> {
        self.record("connect")?;
        match *self.connect_failure.lock() {
            Some(ConnectFailure::Uninitialized) => Err(WardenError::Uninitialized),
            Some(ConnectFailure::Transport) => {
                Err(WardenError::Transport("injected failure: connect".into()))
            }
            None => Ok(()),
        }
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        self.record("nodes")?;
        Ok(self.nodes.lock().clone())
    }

    async fn local_node(&self) -> Result<Node> {
        self.record("local_node")?;
        self.nodes
            .lock()
            .iter()
            .find(|n| n.this_node)
            .cloned()
            .ok_or_else(|| WardenError::Validation("no local node in snapshot".into()))
    }

    fn invalidate_node_cache(&self) {}

    async fn set_memory_quotas(&self, data_mb: u64, index_mb: u64) -> Result<()> {
        self.record("set_memory_quotas")?;
        self.quota_calls.lock().push((data_mb, index_mb));
        Ok(())
    }

    async fn set_services(&self, _services: &[Service]) -> Result<()> {
        self.record("set_services")
    }

    async fn set_hostname(&self, _hostname: &str) -> Result<()> {
        self.record("set_hostname")
    }

    async fn setup_auth(&self) -> Result<()> {
        self.record("setup_auth")
    }

    async fn add_node(
        &self,
        _hostname: &str,
        _username: &str,
        _password: &str,
        _services: &[Service],
    ) -> Result<()> {
        self.record("add_node")
    }

    async fn remove_nodes(&self, hostnames: &[String]) -> Result<()> {
        self.record("remove_nodes")?;
        self.remove_calls.lock().push(hostnames.to_vec());
        let mut left = self.remove_failures_left.lock();
        if *left > 0 {
            *left -= 1;
            return Err(WardenError::Removal("rebalance in progress".into()));
        }
        // a successful removal eventually drops the members from the list
        self.nodes
            .lock()
            .retain(|n| !hostnames.contains(&n.hostname));
        Ok(())
    }

    async fn rebalance(&self, known_nodes: &[String], ejected_nodes: &[String]) -> Result<()> {
        self.record("rebalance")?;
        self.rebalance_calls
            .lock()
            .push((known_nodes.to_vec(), ejected_nodes.to_vec()));
        Ok(())
    }

    async fn rebalance_status(&self) -> Result<RebalanceStatus> {
        self.record("rebalance_status")?;
        Ok(RebalanceStatus::default())
    }

    async fn cluster_id(&self) -> Result<String> {
        self.record("cluster_id")?;
        Ok("00000000-0000-0000-0000-000000000000".to_string())
    }
}
