//! Periodic port-range scan, card fetch, and reachability probing
//! (§4.3). Runs once at startup — gating acceptance of workflow
//! requests — then on a fixed interval, reusing the shutdown-channel
//! idiom from `monitoring/mod.rs`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::agent_client::AgentClient;
use crate::models::{AgentStatus, BrokenReason};
use crate::registry::AgentRegistry;

pub struct DiscoveryConfig {
    pub base_hosts: Vec<String>,
    pub port_start: u16,
    pub port_end: u16,
    pub interval: Duration,
}

pub struct Discovery {
    config: DiscoveryConfig,
    registry: AgentRegistry,
    client: AgentClient,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig, registry: AgentRegistry, client: AgentClient) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            client,
            shutdown_tx: Mutex::new(None),
            handle: Mutex::new(None),
        })
    }

    fn candidate_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        for host in &self.config.base_hosts {
            for port in self.config.port_start..=self.config.port_end {
                urls.push(format!("http://{host}:{port}"));
            }
        }
        urls
    }

    /// One full scan over the cartesian product of hosts and ports,
    /// each URL handled concurrently (§4.3).
    pub async fn run_scan(&self) {
        let urls = self.candidate_urls();
        let tasks = urls.into_iter().map(|url| self.scan_one(url));
        join_all(tasks).await;
    }

    async fn scan_one(&self, url: String) {
        if let Some(agent_id) = self.registry.get_agent_id_by_url(&url).await {
            let reachable = self.client.probe_reachable(&url).await;
            if !reachable {
                info!("agent {} at {} unreachable, removing from registry", agent_id, url);
                self.registry.remove(&agent_id).await;
                return;
            }
            let status = self.registry.get_status(&agent_id).await;
            let context = self.registry.get_context(&agent_id).await.unwrap_or_default();
            if status == AgentStatus::Broken && context.broken_reason == Some(BrokenReason::Offline) {
                info!("agent {} at {} reachable again, marking available", agent_id, url);
                self.registry.update_status(&agent_id, AgentStatus::Available, None, None).await;
            }
            return;
        }

        match self.client.fetch_card(&url).await {
            Ok(card) => {
                if self.registry.get_agent_id_by_url(&url).await.is_some() {
                    // registered concurrently by another scan task between the
                    // lookup above and this fetch completing
                    return;
                }
                let agent_id = uuid::Uuid::new_v4().to_string();
                info!("discovered new agent {} ({}) at {}", agent_id, card.name, url);
                self.registry.register(agent_id, card).await;
            }
            Err(e) => {
                warn!("card fetch failed for {}: {}", url, e);
            }
        }
    }

    /// Runs one scan immediately, then spawns the periodic background
    /// loop. Intended to gate startup: callers should `.await` this
    /// before accepting workflow requests.
    pub async fn start(self: &Arc<Self>) {
        self.run_scan().await;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.interval);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        this.run_scan().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("discovery loop shutting down gracefully");
                        break;
                    }
                }
            }
        });

        *self.handle.lock().await = Some(handle);
    }

    pub async fn shutdown(&self) {
        info!("shutting down discovery loop...");
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("discovery loop task panicked: {}", e);
            }
        }
    }
}
