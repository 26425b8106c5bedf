//! Cluster administrative API client
//!
//! `ClusterAdmin` is the contract the coordinator loops consume; `AdminClient`
//! is the HTTP implementation over one cluster endpoint. Every request goes
//! out unauthenticated first and is retried exactly once with basic auth on a
//! 401; a second 401 is a terminal authentication error for that call.

use crate::error::{Result, WardenError};
use crate::metrics;
use crate::types::{Cluster, Node, Pool, RebalanceStatus, Service, Task};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Method, Response, StatusCode, Url};
use tracing::debug;

/// Cluster-administration operations the coordinators require
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Cheap liveness/initialization probe. `Uninitialized` means the target
    /// has no cluster configuration yet.
    async fn connect(&self) -> Result<()>;

    /// List current members. Fresh on every call.
    async fn nodes(&self) -> Result<Vec<Node>>;

    /// The member answering our queries (`this_node`), cached until
    /// invalidated by a mutating call.
    async fn local_node(&self) -> Result<Node>;

    /// Drop the cached local-node snapshot so the next read is fresh
    fn invalidate_node_cache(&self);

    /// Bring data/index quotas to the given targets, one update per
    /// differing dimension. Matching quotas issue no calls.
    async fn set_memory_quotas(&self, data_mb: u64, index_mb: u64) -> Result<()>;

    /// Set the advertised service set. One-time, must precede first join.
    async fn set_services(&self, services: &[Service]) -> Result<()>;

    /// Set the node's advertised hostname
    async fn set_hostname(&self, hostname: &str) -> Result<()>;

    /// Establish administrative credentials. Safe to call when already
    /// configured.
    async fn setup_auth(&self) -> Result<()>;

    /// Ask this endpoint's cluster to adopt a standalone node
    async fn add_node(
        &self,
        hostname: &str,
        username: &str,
        password: &str,
        services: &[Service],
    ) -> Result<()>;

    /// Eject the given members and trigger the rebalance that carries the
    /// ejection out. Initiation-only; completion is observed via
    /// `rebalance_status`.
    async fn remove_nodes(&self, hostnames: &[String]) -> Result<()>;

    /// Trigger a rebalance over the given OTP identifier sets
    async fn rebalance(&self, known_nodes: &[String], ejected_nodes: &[String]) -> Result<()>;

    /// Derived rebalance view, computed fresh per poll
    async fn rebalance_status(&self) -> Result<RebalanceStatus>;

    /// Poll until none of the given OTP identifiers remain in an
    /// in-progress rebalance or the member list, sleeping the
    /// cluster-recommended refresh period between polls. Status errors are
    /// transient and retried in place; a failed member listing propagates.
    async fn wait_rebalance_settled(&self, ejected_otp: &[String]) -> Result<()> {
        loop {
            let status = match self.rebalance_status().await {
                Ok(status) => status,
                Err(err) => {
                    debug!(error = %err, "rebalance status unavailable, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    continue;
                }
            };

            let in_rebalance = ejected_otp.iter().any(|otp| status.involves(otp));
            if !in_rebalance {
                let nodes = self.nodes().await?;
                let still_member = nodes
                    .iter()
                    .any(|n| ejected_otp.iter().any(|otp| *otp == n.otp_node));
                if !still_member {
                    return Ok(());
                }
            }

            let secs = if status.recommended_refresh_period > 0.0 {
                status.recommended_refresh_period
            } else {
                0.5
            };
            tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
        }
    }

    /// Cluster UUID, cached for the life of the client handle
    async fn cluster_id(&self) -> Result<String>;
}

/// HTTP implementation of [`ClusterAdmin`] over one admin endpoint
pub struct AdminClient {
    base: Url,
    username: String,
    password: String,
    http: reqwest::Client,
    node_cache: RwLock<Option<Node>>,
    cluster_cache: RwLock<Option<Cluster>>,
}

impl AdminClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<AdminClient> {
        let base = Url::parse(base_url)
            .map_err(|e| WardenError::Config(format!("invalid admin URL '{base_url}': {e}")))?;
        Ok(AdminClient {
            base,
            username: username.to_string(),
            password: password.to_string(),
            http: reqwest::Client::new(),
            node_cache: RwLock::new(None),
            cluster_cache: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| WardenError::Validation(format!("invalid path '{path}': {e}")))
    }

    /// Issue a request without credentials, retrying exactly once with basic
    /// auth on a 401. A second 401 is a terminal `Auth` error.
    async fn request(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(&str, String)]>,
    ) -> Result<Response> {
        let url = self.url(path)?;
        metrics::record_admin_request(method.as_str(), path);
        debug!(method = %method, url = %url, "admin request");

        let build = |authenticated: bool| {
            let mut req = self.http.request(method.clone(), url.clone());
            if let Some(form) = form {
                req = req.form(form);
            }
            if authenticated {
                req = req.basic_auth(&self.username, Some(&self.password));
            }
            req
        };

        let resp = build(false).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let resp = build(true).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            metrics::record_admin_error(path, "auth");
            return Err(WardenError::Auth(path.to_string()));
        }
        Ok(resp)
    }

    /// Reject any status outside the accepted set, carrying body context
    async fn check_status(&self, resp: Response, accepted: &[StatusCode]) -> Result<Response> {
        if accepted.contains(&resp.status()) {
            return Ok(resp);
        }
        let path = resp.url().path().to_string();
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        metrics::record_admin_error(&path, "unexpected_status");
        Err(WardenError::UnexpectedStatus { path, status, body })
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<()> {
        let resp = self.request(Method::POST, path, Some(form)).await?;
        self.check_status(resp, &[StatusCode::OK]).await?;
        Ok(())
    }

    /// Port the admin plane answers on, for the auth bootstrap payload
    fn admin_port(&self) -> u16 {
        self.base.port_or_known_default().unwrap_or(80)
    }

    async fn update_quota(&self, key: &str, quota_mb: u64) -> Result<()> {
        debug!(key, quota_mb, "updating memory quota");
        self.post_form("/pools/default", &[(key, quota_mb.to_string())])
            .await?;
        // the cached snapshot no longer reflects the node
        self.invalidate_node_cache();
        Ok(())
    }

    async fn cluster(&self) -> Result<Cluster> {
        if let Some(cluster) = self.cluster_cache.read().clone() {
            return Ok(cluster);
        }
        let resp = self.request(Method::GET, "/pools", None).await?;
        let resp = self.check_status(resp, &[StatusCode::OK]).await?;
        let cluster: Cluster = resp
            .json()
            .await
            .map_err(|e| WardenError::Validation(format!("decoding cluster identity: {e}")))?;
        *self.cluster_cache.write() = Some(cluster.clone());
        Ok(cluster)
    }

}

#[async_trait]
impl ClusterAdmin for AdminClient {
    async fn connect(&self) -> Result<()> {
        self.local_node().await.map(|_| ())
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        let resp = self.request(Method::GET, "/pools/default", None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(WardenError::Uninitialized);
        }
        let resp = self.check_status(resp, &[StatusCode::OK]).await?;
        let pool: Pool = resp
            .json()
            .await
            .map_err(|e| WardenError::Validation(format!("decoding node list: {e}")))?;
        Ok(pool.nodes)
    }

    async fn local_node(&self) -> Result<Node> {
        if let Some(node) = self.node_cache.read().clone() {
            return Ok(node);
        }
        let nodes = self.nodes().await?;
        let node = nodes
            .into_iter()
            .find(|n| n.this_node)
            .ok_or_else(|| WardenError::Validation("no local node in snapshot".into()))?;
        *self.node_cache.write() = Some(node.clone());
        Ok(node)
    }

    fn invalidate_node_cache(&self) {
        *self.node_cache.write() = None;
    }

    async fn set_memory_quotas(&self, data_mb: u64, index_mb: u64) -> Result<()> {
        let info = self.local_node().await?;

        if info.memory_quota != data_mb {
            self.update_quota("memoryQuota", data_mb).await?;
        }
        if info.index_memory_quota != index_mb {
            self.update_quota("indexMemoryQuota", index_mb).await?;
        }
        Ok(())
    }

    async fn set_services(&self, services: &[Service]) -> Result<()> {
        debug!(services = %Service::join_wire(services), "setting up services");
        self.post_form(
            "/node/controller/setupServices",
            &[("services", Service::join_wire(services))],
        )
        .await
    }

    async fn set_hostname(&self, hostname: &str) -> Result<()> {
        debug!(hostname, "renaming node");
        self.post_form(
            "/node/controller/rename",
            &[("hostname", hostname.to_string())],
        )
        .await
    }

    async fn setup_auth(&self) -> Result<()> {
        // A 200 means the endpoint is still open (or our credentials already
        // work); either way posting the credentials is safe. The request
        // helper has already turned a credential mismatch into `Auth`.
        let resp = self.request(Method::GET, "/settings/web", None).await?;
        let _ = self.check_status(resp, &[StatusCode::OK]).await?;

        self.post_form(
            "/settings/web",
            &[
                ("username", self.username.clone()),
                ("password", self.password.clone()),
                ("port", self.admin_port().to_string()),
            ],
        )
        .await
    }

    async fn add_node(
        &self,
        hostname: &str,
        username: &str,
        password: &str,
        services: &[Service],
    ) -> Result<()> {
        debug!(hostname, username, "adding node to cluster");
        self.post_form(
            "/controller/addNode",
            &[
                ("hostname", hostname.to_string()),
                ("user", username.to_string()),
                ("password", password.to_string()),
                ("services", Service::join_wire(services)),
            ],
        )
        .await
    }

    async fn remove_nodes(&self, hostnames: &[String]) -> Result<()> {
        let nodes = self.nodes().await?;

        let mut all_otp = Vec::with_capacity(nodes.len());
        let mut eject_otp = Vec::new();
        for node in &nodes {
            if node.otp_node.is_empty() {
                return Err(WardenError::Validation(format!(
                    "no OTP identifier for node '{}'",
                    node.hostname
                )));
            }
            all_otp.push(node.otp_node.clone());
            if hostnames.contains(&node.hostname) {
                eject_otp.push(node.otp_node.clone());
            }
        }

        if eject_otp.len() != hostnames.len() {
            return Err(WardenError::Removal(
                "some nodes to be removed are not part of the cluster".into(),
            ));
        }

        self.rebalance(&all_otp, &eject_otp)
            .await
            .map_err(|e| WardenError::Removal(e.to_string()))
    }

    async fn rebalance(&self, known_nodes: &[String], ejected_nodes: &[String]) -> Result<()> {
        debug!(known = ?known_nodes, ejected = ?ejected_nodes, "requesting rebalance");
        self.post_form(
            "/controller/rebalance",
            &[
                ("knownNodes", known_nodes.join(",")),
                ("ejectedNodes", ejected_nodes.join(",")),
            ],
        )
        .await
    }

    async fn rebalance_status(&self) -> Result<RebalanceStatus> {
        let resp = self
            .request(Method::GET, "/pools/default/tasks", None)
            .await?;
        let resp = self.check_status(resp, &[StatusCode::OK]).await?;
        let tasks: Vec<Task> = resp
            .json()
            .await
            .map_err(|e| WardenError::Validation(format!("decoding task list: {e}")))?;
        RebalanceStatus::from_tasks(&tasks)
    }

    async fn cluster_id(&self) -> Result<String> {
        Ok(self.cluster().await?.uuid)
    }
}
