//! Nodewarden - cluster lifecycle coordinator for a clustered-database node
//!
//! Runs as a companion process to one database node and drives it through
//! joining, participating in, and leaving its cluster:
//!
//! - **Client**: administrative API client with 401-retry authentication
//! - **Join coordinator**: repeating task that initializes the local node
//!   and ensures cluster membership
//! - **Maintainer loop**: quota enforcement and debounced rebalance
//!   triggering, active only on the node elected by naming convention
//! - **Shutdown coordinator**: two-source barrier (signal + pre-stop hook)
//!   guarding a one-shot drain that retries node removal until it succeeds
//! - **Status server**: loopback-only readiness/liveness probes and the
//!   graceful-stop hook
//!
//! The sidecar is a stateless reconciler: nothing about membership is kept
//! locally, every loop iteration re-derives intent from the remote cluster,
//! and every decision tolerates a snapshot that is already stale by the time
//! an action is issued.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod join;
pub mod maintainer;
pub mod metrics;
pub mod shutdown;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use api::{HookOp, StatusServer};
pub use client::{AdminClient, ClusterAdmin};
pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use join::JoinCoordinator;
pub use maintainer::{is_maintainer, maintainer_node, MaintainerLoop};
pub use shutdown::{ShutdownCoordinator, ShutdownSource, ShutdownState};
pub use types::{Cluster, Node, RebalanceStatus, Service};
