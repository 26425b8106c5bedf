//! Sidecar configuration

use crate::error::{Result, WardenError};
use crate::types::Service;
use serde::{Deserialize, Serialize};

/// Main sidecar configuration.
///
/// Populated from the environment by the agent binary; the coordinator
/// code treats these values as already validated.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WardenConfig {
    /// Name of the cluster this node belongs to (lower-cased by `finalize`)
    pub cluster_name: String,

    /// This node's own name, resolvable by the other members
    pub node_name: String,

    /// Administrative endpoint of the local node
    #[serde(default = "default_node_url")]
    pub node_url: String,

    /// Administrative endpoint of the cluster (a different address than the
    /// local node once clustered)
    pub cluster_url: String,

    /// Administrative credentials
    pub username: String,
    pub password: String,

    /// Port the administrative API listens on, used to form the advertised
    /// `host:port` identity
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Container memory limits in MB, per service
    #[serde(default)]
    pub data_memory_limit_mb: u64,
    #[serde(default)]
    pub index_memory_limit_mb: u64,
    #[serde(default)]
    pub query_memory_limit_mb: u64,

    /// Services this node advertises
    #[serde(default = "default_services")]
    pub services: Vec<Service>,

    /// Seconds between coordinator loop iterations
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How long the set of newly-joined nodes must stay unchanged before a
    /// rebalance is triggered, in seconds
    #[serde(default = "default_rebalance_debounce")]
    pub rebalance_debounce_secs: u64,

    /// Fraction of the configured memory limits given to the database quotas
    #[serde(default = "default_memory_ratio")]
    pub memory_ratio: f64,

    /// Backoff between node-removal attempts during shutdown, in seconds
    #[serde(default = "default_removal_backoff")]
    pub removal_backoff_secs: u64,

    /// Port for the loopback-only status/hook server
    #[serde(default = "default_status_port")]
    pub status_port: u16,
}

fn default_node_url() -> String {
    "http://127.0.0.1:8091".to_string()
}

fn default_admin_port() -> u16 {
    8091
}

fn default_services() -> Vec<Service> {
    vec![Service::Data]
}

fn default_poll_interval() -> u64 {
    10
}

fn default_rebalance_debounce() -> u64 {
    30
}

fn default_memory_ratio() -> f64 {
    0.75
}

fn default_removal_backoff() -> u64 {
    5
}

fn default_status_port() -> u16 {
    8080
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            node_name: String::new(),
            node_url: default_node_url(),
            cluster_url: String::new(),
            username: String::new(),
            password: String::new(),
            admin_port: default_admin_port(),
            data_memory_limit_mb: 0,
            index_memory_limit_mb: 0,
            query_memory_limit_mb: 0,
            services: default_services(),
            poll_interval_secs: default_poll_interval(),
            rebalance_debounce_secs: default_rebalance_debounce(),
            memory_ratio: default_memory_ratio(),
            removal_backoff_secs: default_removal_backoff(),
            status_port: default_status_port(),
        }
    }
}

impl WardenConfig {
    /// Normalize and validate the configuration.
    ///
    /// The cluster name is lower-cased here, once; every later comparison
    /// (maintainer election, hostname matching) is exact. This is the only
    /// place names are normalized.
    pub fn finalize(mut self) -> Result<WardenConfig> {
        self.cluster_name = self.cluster_name.to_lowercase();
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.cluster_name.is_empty() {
            missing.push("cluster_name");
        }
        if self.node_name.is_empty() {
            missing.push("node_name");
        }
        if self.cluster_url.is_empty() {
            missing.push("cluster_url");
        }
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if !missing.is_empty() {
            return Err(WardenError::Config(format!(
                "missing required setting(s): {}",
                missing.join(", ")
            )));
        }
        if self.services.is_empty() {
            return Err(WardenError::Config(
                "at least one service must be advertised".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.memory_ratio) {
            return Err(WardenError::Config(format!(
                "memory_ratio must be within 0..=1, got {}",
                self.memory_ratio
            )));
        }
        Ok(())
    }

    /// Advertised `host:port` identity of this node on the admin plane
    pub fn advertised_hostname(&self) -> String {
        format!("{}:{}", self.node_name, self.admin_port)
    }

    /// Target data quota in MB after applying the memory ratio
    pub fn data_quota_mb(&self) -> u64 {
        (self.data_memory_limit_mb as f64 * self.memory_ratio) as u64
    }

    /// Target index quota in MB after applying the memory ratio
    pub fn index_quota_mb(&self) -> u64 {
        (self.index_memory_limit_mb as f64 * self.memory_ratio) as u64
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rebalance_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rebalance_debounce_secs)
    }

    pub fn removal_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.removal_backoff_secs)
    }
}
