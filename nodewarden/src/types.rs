//! Typed representations of remote cluster facts
//!
//! Everything here is decoded fresh from the cluster's administrative API.
//! Node snapshots are stale the moment a mutating call goes out; callers
//! re-fetch rather than patching local copies. The remote cluster is the
//! source of truth.

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Membership state reported for a node that is part of the working set
pub const MEMBERSHIP_ACTIVE: &str = "active";
/// Membership state for a node that joined but has not been rebalanced in yet
pub const MEMBERSHIP_INACTIVE_ADDED: &str = "inactiveAdded";

/// A cluster member as reported by the administrative plane.
///
/// `cluster_membership` is an opaque string matched by exact value; the
/// admin API has transitional states beyond the two constants above.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    pub hostname: String,
    /// Internal OTP-style member identifier, distinct from the hostname
    pub otp_node: String,
    pub cluster_membership: String,
    pub status: String,
    /// Set on exactly the node answering the query, at most one per snapshot
    pub this_node: bool,
    /// Configured data-service memory quota in MB
    pub memory_quota: u64,
    /// Configured index-service memory quota in MB
    pub index_memory_quota: u64,
    pub services: Vec<String>,
}

impl Node {
    pub fn is_active(&self) -> bool {
        self.cluster_membership == MEMBERSHIP_ACTIVE
    }

    pub fn is_inactive_added(&self) -> bool {
        self.cluster_membership == MEMBERSHIP_INACTIVE_ADDED
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Cluster identity, fetched once and cached per client handle
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cluster {
    pub uuid: String,
    pub is_admin_creds: bool,
    pub is_enterprise: bool,
}

/// Decode shape of `GET /pools/default`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Pool {
    pub nodes: Vec<Node>,
}

/// Raw task record from `GET /pools/default/tasks`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: String,
    pub progress: f64,
    pub recommended_refresh_period: f64,
    pub per_node: HashMap<String, NodeProgress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeProgress {
    pub progress: f64,
}

pub const REBALANCE_STATUS_RUNNING: &str = "running";
pub const REBALANCE_STATUS_NOT_RUNNING: &str = "notRunning";

/// Derived view over the rebalance task record.
///
/// `running == false` implies `progress` and `nodes` carry no meaning and
/// are left zero-valued. Computed fresh per poll, never cached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceStatus {
    pub running: bool,
    /// Overall progress, 0-100
    pub progress: f64,
    /// OTP identifiers of nodes participating in the rebalance
    pub nodes: Vec<String>,
    /// Polling interval recommended by the cluster, in seconds
    pub recommended_refresh_period: f64,
}

impl RebalanceStatus {
    /// Derive the rebalance view from a raw task list.
    ///
    /// Returns `Validation` when no rebalance task is present or its status
    /// is one we do not understand.
    pub fn from_tasks(tasks: &[Task]) -> Result<RebalanceStatus> {
        for task in tasks {
            if task.task_type != "rebalance" {
                continue;
            }
            match task.status.as_str() {
                REBALANCE_STATUS_NOT_RUNNING => {
                    return Ok(RebalanceStatus {
                        recommended_refresh_period: task.recommended_refresh_period,
                        ..RebalanceStatus::default()
                    });
                }
                REBALANCE_STATUS_RUNNING => {
                    let mut nodes: Vec<String> = task.per_node.keys().cloned().collect();
                    nodes.sort();
                    return Ok(RebalanceStatus {
                        running: true,
                        progress: task.progress,
                        nodes,
                        recommended_refresh_period: task.recommended_refresh_period,
                    });
                }
                other => {
                    return Err(WardenError::Validation(format!(
                        "unknown rebalance task status '{other}'"
                    )));
                }
            }
        }
        Err(WardenError::Validation(
            "no rebalance task in task list".into(),
        ))
    }

    pub fn involves(&self, otp_node: &str) -> bool {
        self.nodes.iter().any(|n| n == otp_node)
    }
}

/// Services a node can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Key-value (data) service
    Data,
    Index,
    Query,
}

impl Service {
    /// Wire name used by the administrative API
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Data => "kv",
            Service::Index => "index",
            Service::Query => "n1ql",
        }
    }

    /// Parse the operator-facing label form (`data`, `index`, `query`),
    /// case-insensitively
    pub fn from_label(label: &str) -> Option<Service> {
        match label.trim().to_lowercase().as_str() {
            "data" => Some(Service::Data),
            "index" => Some(Service::Index),
            "query" => Some(Service::Query),
            _ => None,
        }
    }

    /// Comma-joined wire form for form-encoded requests
    pub fn join_wire(services: &[Service]) -> String {
        services
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_task_json() -> &'static str {
        r#"[
          {
            "progress": 10.33,
            "subtype": "rebalance",
            "type": "rebalance",
            "status": "running",
            "recommendedRefreshPeriod": 0.25,
            "perNode": {
              "ns_1@db-data-2.db-data.default.svc.cluster.local": { "progress": 10.85 },
              "ns_1@db-data-1.db-data.default.svc.cluster.local": { "progress": 9.39 },
              "ns_1@db-data-0.db-data.default.svc.cluster.local": { "progress": 10.74 }
            }
          }
        ]"#
    }

    #[test]
    fn test_rebalance_status_running() {
        let tasks: Vec<Task> = serde_json::from_str(running_task_json()).unwrap();
        let status = RebalanceStatus::from_tasks(&tasks).unwrap();

        assert!(status.running);
        assert!((status.progress - 10.33).abs() < f64::EPSILON);
        assert!((status.recommended_refresh_period - 0.25).abs() < f64::EPSILON);
        assert_eq!(
            status.nodes,
            vec![
                "ns_1@db-data-0.db-data.default.svc.cluster.local",
                "ns_1@db-data-1.db-data.default.svc.cluster.local",
                "ns_1@db-data-2.db-data.default.svc.cluster.local",
            ]
        );
        assert!(status.involves("ns_1@db-data-1.db-data.default.svc.cluster.local"));
        assert!(!status.involves("ns_1@db-data-9.db-data.default.svc.cluster.local"));
    }

    #[test]
    fn test_rebalance_status_not_running() {
        let tasks: Vec<Task> = serde_json::from_str(
            r#"[{"type": "rebalance", "status": "notRunning"}]"#,
        )
        .unwrap();
        let status = RebalanceStatus::from_tasks(&tasks).unwrap();

        assert!(!status.running);
        assert_eq!(status.progress, 0.0);
        assert!(status.nodes.is_empty());
    }

    #[test]
    fn test_rebalance_status_missing() {
        let tasks: Vec<Task> =
            serde_json::from_str(r#"[{"type": "indexer", "status": "running"}]"#).unwrap();
        let err = RebalanceStatus::from_tasks(&tasks).unwrap_err();
        assert_eq!(err.error_type(), "validation");
    }

    #[test]
    fn test_node_decode() {
        let node: Node = serde_json::from_str(
            r#"{
              "hostname": "db-data-1:8091",
              "otpNode": "ns_1@db-data-1",
              "clusterMembership": "inactiveAdded",
              "status": "healthy",
              "thisNode": true,
              "memoryQuota": 512,
              "indexMemoryQuota": 256,
              "services": ["kv", "index"]
            }"#,
        )
        .unwrap();

        assert!(node.this_node);
        assert!(node.is_inactive_added());
        assert!(!node.is_active());
        assert!(node.is_healthy());
        assert_eq!(node.memory_quota, 512);
        assert_eq!(node.otp_node, "ns_1@db-data-1");
    }

    #[test]
    fn test_service_labels_and_wire_names() {
        assert_eq!(Service::from_label("Data"), Some(Service::Data));
        assert_eq!(Service::from_label(" query "), Some(Service::Query));
        assert_eq!(Service::from_label("analytics"), None);
        assert_eq!(
            Service::join_wire(&[Service::Data, Service::Index, Service::Query]),
            "kv,index,n1ql"
        );
    }
}
