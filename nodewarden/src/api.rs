//! Local control surface
//!
//! A loopback-only HTTP server with the readiness/liveness probes and the
//! pre-stop hook. The hook accepts a closed set of operations; unknown
//! operations are rejected at decode time. A hook caller blocks until the
//! node has actually left the cluster, so an orchestrator invoking it as a
//! pre-stop action cannot race the removal.

use crate::client::ClusterAdmin;
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::maintainer::is_maintainer;
use crate::shutdown::{ShutdownCoordinator, ShutdownSource};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Operations the hook endpoint accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HookOp {
    /// Stop all loops and remove this node from the cluster; the response
    /// is sent once removal has completed
    RequestGracefulStop,
}

#[derive(Clone)]
struct AppState {
    config: WardenConfig,
    local: Arc<dyn ClusterAdmin>,
    coordinator: Arc<ShutdownCoordinator>,
}

pub struct StatusServer {
    config: WardenConfig,
    local: Arc<dyn ClusterAdmin>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl StatusServer {
    pub fn new(
        config: WardenConfig,
        local: Arc<dyn ClusterAdmin>,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            config,
            local,
            coordinator,
        }
    }

    fn router(&self) -> Router {
        let state = AppState {
            config: self.config.clone(),
            local: self.local.clone(),
            coordinator: self.coordinator.clone(),
        };
        Router::new()
            .route("/hook", post(hook_handler))
            .route("/_status/ready", get(ready_handler))
            .route("/_status/live", get(|| async { "ok" }))
            .fallback(|| async { (StatusCode::NOT_FOUND, "nodewarden - 404 not found") })
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve on the loopback interface until shutdown reaches `Done`.
    /// In-flight responses (notably a blocked hook caller) are completed
    /// before the listener goes away.
    pub async fn serve(self) -> Result<()> {
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.config.status_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| WardenError::Config(format!("binding status server on {addr}: {e}")))?;
        info!("status server listening on http://{addr}/");

        let coordinator = self.coordinator.clone();
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { coordinator.wait_done().await })
            .await
            .map_err(|e| WardenError::Transport(e.to_string()))?;

        info!("status server stopped");
        Ok(())
    }
}

async fn hook_handler(
    State(state): State<AppState>,
    Json(op): Json<HookOp>,
) -> (StatusCode, &'static str) {
    match op {
        HookOp::RequestGracefulStop => {
            debug!("received graceful stop hook");
            state
                .coordinator
                .request_stop(ShutdownSource::Hook)
                .await;
            (StatusCode::OK, "removed")
        }
    }
}

/// Readiness reflects the local node's health, except on the maintainer:
/// its role is administrative, so it reports ready independent of its own
/// data health.
async fn ready_handler(State(state): State<AppState>) -> (StatusCode, String) {
    let health = node_health(&state).await;
    if is_maintainer(&state.config.cluster_name, &state.config.node_name) || health.is_ok() {
        (StatusCode::OK, "ok".to_string())
    } else {
        let err = health.unwrap_err();
        warn!(error = %err, "failed readiness check");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("not ready: {err}"),
        )
    }
}

async fn node_health(state: &AppState) -> Result<()> {
    let nodes = state.local.nodes().await?;
    if nodes.len() < 2 {
        return Err(WardenError::Validation(
            "node has not joined the cluster yet".into(),
        ));
    }
    let node = nodes
        .iter()
        .find(|n| n.this_node)
        .ok_or_else(|| WardenError::Validation("no local node in snapshot".into()))?;
    if !node.is_healthy() {
        return Err(WardenError::Validation(format!(
            "status of node is '{}', expected 'healthy'",
            node.status
        )));
    }
    Ok(())
}
