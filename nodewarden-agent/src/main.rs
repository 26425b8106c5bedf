use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nodewarden::{
    AdminClient, ClusterAdmin, JoinCoordinator, MaintainerLoop, ShutdownCoordinator,
    ShutdownSource, Service, StatusServer, WardenConfig,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nodewarden")]
#[command(about = "Per-node sidecar managing a clustered-database member")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sidecar next to the local database node
    Run(RunArgs),
    /// Ask a running sidecar to gracefully remove its node from the cluster
    Stop(StopArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Name of the cluster this node belongs to
    #[arg(long, env = "CLUSTER_NAME")]
    cluster_name: String,

    /// This node's own name, resolvable by the other members
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Administrative endpoint of the local node
    #[arg(long, env = "NODE_URL", default_value = "http://127.0.0.1:8091")]
    node_url: String,

    /// Administrative endpoint of the cluster
    #[arg(long, env = "CLUSTER_URL")]
    cluster_url: String,

    /// Administrative username
    #[arg(long, env = "ADMIN_USERNAME")]
    username: String,

    /// Administrative password
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    password: String,

    /// Data-service memory limit in MB
    #[arg(long, env = "DATA_MEMORY_LIMIT_MB", default_value_t = 0)]
    data_memory_limit_mb: u64,

    /// Index-service memory limit in MB
    #[arg(long, env = "INDEX_MEMORY_LIMIT_MB", default_value_t = 0)]
    index_memory_limit_mb: u64,

    /// Query-service memory limit in MB
    #[arg(long, env = "QUERY_MEMORY_LIMIT_MB", default_value_t = 0)]
    query_memory_limit_mb: u64,

    /// Comma-separated services this node advertises (data, index, query)
    #[arg(long, env = "SERVICES", default_value = "data")]
    services: String,

    /// Seconds between coordinator loop iterations
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 10)]
    poll_interval_secs: u64,

    /// Seconds the pending-node set must stay unchanged before a rebalance
    #[arg(long, env = "REBALANCE_DEBOUNCE_SECS", default_value_t = 30)]
    rebalance_debounce_secs: u64,

    /// Port for the loopback status/hook server
    #[arg(long, env = "STATUS_PORT", default_value_t = 8080)]
    status_port: u16,
}

#[derive(Args, Debug)]
struct StopArgs {
    /// Port the sidecar's status server listens on
    #[arg(long, env = "STATUS_PORT", default_value_t = 8080)]
    status_port: u16,
}

fn parse_services(raw: &str) -> Result<Vec<Service>> {
    let mut services = Vec::new();
    for label in raw.split(',') {
        let service = Service::from_label(label)
            .with_context(|| format!("unknown service label '{}'", label.trim()))?;
        if !services.contains(&service) {
            services.push(service);
        }
    }
    if services.is_empty() {
        bail!("no valid service label in '{raw}'");
    }
    Ok(services)
}

impl RunArgs {
    fn into_config(self) -> Result<WardenConfig> {
        let services = parse_services(&self.services)?;
        let config = WardenConfig {
            cluster_name: self.cluster_name,
            node_name: self.node_name,
            node_url: self.node_url,
            cluster_url: self.cluster_url,
            username: self.username,
            password: self.password,
            data_memory_limit_mb: self.data_memory_limit_mb,
            index_memory_limit_mb: self.index_memory_limit_mb,
            query_memory_limit_mb: self.query_memory_limit_mb,
            services,
            poll_interval_secs: self.poll_interval_secs,
            rebalance_debounce_secs: self.rebalance_debounce_secs,
            status_port: self.status_port,
            ..WardenConfig::default()
        };
        config.finalize().context("invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,nodewarden=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args).await,
        Command::Stop(args) => stop(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.into_config()?;
    tracing::info!(
        cluster = %config.cluster_name,
        node = %config.node_name,
        "starting nodewarden"
    );

    // Each task gets its own client handles: snapshot caches are per-handle
    // and never shared across tasks.
    let local_client = |cfg: &WardenConfig| -> Result<Arc<dyn ClusterAdmin>> {
        Ok(Arc::new(AdminClient::new(
            &cfg.node_url,
            &cfg.username,
            &cfg.password,
        )?))
    };
    let cluster_client = |cfg: &WardenConfig| -> Result<Arc<dyn ClusterAdmin>> {
        Ok(Arc::new(AdminClient::new(
            &cfg.cluster_url,
            &cfg.username,
            &cfg.password,
        )?))
    };

    let coordinator = Arc::new(ShutdownCoordinator::new(
        config.clone(),
        local_client(&config)?,
        cluster_client(&config)?,
    ));
    let cancel = coordinator.cancel_token();

    let join = JoinCoordinator::new(
        config.clone(),
        local_client(&config)?,
        cluster_client(&config)?,
    );
    let join_cancel = cancel.clone();
    coordinator
        .tracker()
        .spawn(async move { join.run(join_cancel).await });

    let maintainer = MaintainerLoop::new(config.clone(), local_client(&config)?);
    coordinator
        .tracker()
        .spawn(async move { maintainer.run(cancel).await });

    // The status server outlives the worker loops: a blocked hook caller
    // must still get its response after the drain, so it shuts down on
    // `Done` rather than on the cancellation token.
    let server = StatusServer::new(config.clone(), local_client(&config)?, coordinator.clone());
    tokio::spawn(async move {
        if let Err(err) = server.serve().await {
            tracing::error!(error = %err, "status server failed");
        }
    });

    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?;

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;

        signal_coordinator
            .request_stop(ShutdownSource::Signal)
            .await;
    });

    coordinator.wait_done().await;
    tracing::info!("node removed, goodbye");
    Ok(())
}

async fn stop(args: StopArgs) -> Result<()> {
    tracing::info!("asking sidecar to stop");
    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/hook", args.status_port))
        .json(&serde_json::json!({ "op": "request_graceful_stop" }))
        .send()
        .await
        .context("reaching the sidecar's status server")?;

    if !resp.status().is_success() {
        bail!(
            "sidecar stop failed: {} {}",
            resp.status(),
            resp.text().await.unwrap_or_default()
        );
    }
    tracing::info!("node removed from cluster");
    Ok(())
}
