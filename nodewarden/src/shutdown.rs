//! Graceful-shutdown coordinator
//!
//! Shutdown is armed by two independent sources: the OS termination signal
//! and the externally invoked pre-stop hook. Draining begins only once both
//! have fired, so a hook invocation without an imminent process exit (or a
//! bare signal without an external drain request) never ejects the node.
//!
//! Once the barrier opens the drain sequence runs exactly once: cancel all
//! repeating loops, wait for them to exit, then retry node removal until it
//! succeeds. Removal can legitimately fail while a prior rebalance is in
//! progress, and leaving a node un-ejected corrupts cluster membership
//! bookkeeping, so the retry is unbounded by design.

use crate::client::ClusterAdmin;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, OnceCell};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Phases of process shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    /// Loops are being cancelled and awaited
    Draining,
    /// Node removal is being retried against the cluster
    Removing,
    Done,
}

impl ShutdownState {
    pub fn ordinal(&self) -> u8 {
        match self {
            ShutdownState::Running => 0,
            ShutdownState::Draining => 1,
            ShutdownState::Removing => 2,
            ShutdownState::Done => 3,
        }
    }
}

/// The two independent shutdown triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSource {
    /// OS termination signal
    Signal,
    /// Pre-stop hook invoked on the local control surface
    Hook,
}

pub struct ShutdownCoordinator {
    config: WardenConfig,
    local: Arc<dyn ClusterAdmin>,
    cluster: Arc<dyn ClusterAdmin>,

    cancel: CancellationToken,
    tracker: TaskTracker,

    fired: Mutex<HashSet<ShutdownSource>>,
    barrier_tx: watch::Sender<bool>,
    drain_once: OnceCell<()>,
    state_tx: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
    pub fn new(
        config: WardenConfig,
        local: Arc<dyn ClusterAdmin>,
        cluster: Arc<dyn ClusterAdmin>,
    ) -> Self {
        let (barrier_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(ShutdownState::Running);
        Self {
            config,
            local,
            cluster,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            fired: Mutex::new(HashSet::new()),
            barrier_tx,
            drain_once: OnceCell::new(),
            state_tx,
        }
    }

    /// Cancellation signal shared by all repeating loops
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tracker the agent spawns loop tasks on; its completion is the barrier
    /// between draining and removal
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn state(&self) -> ShutdownState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ShutdownState) {
        metrics::record_shutdown_state(state.ordinal());
        // send_replace stores the value even with no live receiver; a plain
        // send would drop the transition whenever nobody is subscribed yet
        self.state_tx.send_replace(state);
    }

    /// Record a shutdown source. Returns true once both distinct sources
    /// have fired at least once; refiring one source does not substitute
    /// for the other.
    fn fire(&self, source: ShutdownSource) -> bool {
        let mut fired = self.fired.lock();
        fired.insert(source);
        let open = fired.len() == 2;
        if open {
            // must reach callers that subscribe after this point
            self.barrier_tx.send_replace(true);
        }
        open
    }

    /// Request shutdown from one source and block until removal has
    /// completed. Every caller, however many and however concurrent, waits
    /// for the same single drain execution.
    pub async fn request_stop(&self, source: ShutdownSource) {
        info!(?source, "shutdown requested");
        self.fire(source);

        let mut barrier = self.barrier_tx.subscribe();
        while !*barrier.borrow_and_update() {
            if barrier.changed().await.is_err() {
                return;
            }
        }

        self.drain_once
            .get_or_init(|| async {
                self.drain().await;
            })
            .await;
    }

    /// Block until the shutdown state machine reaches `Done`
    pub async fn wait_done(&self) {
        let mut rx = self.state_tx.subscribe();
        while *rx.borrow_and_update() != ShutdownState::Done {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// The one-shot drain body: stop all loops, wait for them, then retry
    /// node removal until it succeeds.
    async fn drain(&self) {
        info!("draining: stopping worker loops");
        self.set_state(ShutdownState::Draining);
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        self.set_state(ShutdownState::Removing);
        let ejected = loop {
            match self.remove_myself().await {
                Ok(otp_node) => {
                    metrics::record_removal_attempt(true);
                    break otp_node;
                }
                Err(err) => {
                    metrics::record_removal_attempt(false);
                    warn!(error = %err, "removing node failed, retrying");
                    tokio::time::sleep(self.config.removal_backoff()).await;
                }
            }
        };

        // removal only initiates the ejection rebalance; stay in Removing
        // until the cluster no longer lists us
        while let Err(err) = self
            .cluster
            .wait_rebalance_settled(std::slice::from_ref(&ejected))
            .await
        {
            warn!(error = %err, "waiting for ejection to settle failed, retrying");
            tokio::time::sleep(self.config.removal_backoff()).await;
        }

        info!("node removed from cluster");
        self.set_state(ShutdownState::Done);
    }

    /// Read the local node's own identity and eject it via the cluster
    /// endpoint. Removal is attempted by every node on shutdown, maintainer
    /// or not. Returns the ejected OTP identifier for the settle wait.
    async fn remove_myself(&self) -> Result<String> {
        let node = self.local.local_node().await?;
        self.cluster.remove_nodes(&[node.hostname]).await?;
        Ok(node.otp_node)
    }
}
