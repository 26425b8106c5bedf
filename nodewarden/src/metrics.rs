//! Sidecar observability metrics
//!
//! Free-function helpers over the `metrics` facade:
//! - Admin API requests and errors
//! - Coordinator loop iterations
//! - Rebalance triggers
//! - Shutdown state

/// Record one administrative API request
pub fn record_admin_request(method: &str, path: &str) {
    metrics::counter!(
        "nodewarden_admin_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
    )
    .increment(1);
}

/// Record a failed administrative API call
pub fn record_admin_error(path: &str, error_type: &str) {
    metrics::counter!(
        "nodewarden_admin_errors_total",
        "path" => path.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record one coordinator loop iteration
pub fn record_loop_iteration(component: &str) {
    metrics::counter!(
        "nodewarden_loop_iterations_total",
        "component" => component.to_string(),
    )
    .increment(1);
}

/// Record a loop-level failure (caught at the loop boundary)
pub fn record_loop_error(component: &str, error_type: &str) {
    metrics::counter!(
        "nodewarden_loop_errors_total",
        "component" => component.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record a rebalance request issued by the maintainer
pub fn record_rebalance_trigger(known_nodes: usize) {
    metrics::counter!("nodewarden_rebalance_triggers_total").increment(1);
    metrics::gauge!("nodewarden_rebalance_known_nodes").set(known_nodes as f64);
}

/// Record a node-removal attempt during shutdown
pub fn record_removal_attempt(success: bool) {
    metrics::counter!(
        "nodewarden_removal_attempts_total",
        "status" => if success { "ok" } else { "error" },
    )
    .increment(1);
}

/// Publish the shutdown state as an ordinal gauge (0=running .. 3=done)
pub fn record_shutdown_state(ordinal: u8) {
    metrics::gauge!("nodewarden_shutdown_state").set(ordinal as f64);
}
