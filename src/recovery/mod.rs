//! Recovery loop for BROKEN agents (§4.4): a FIFO consumer with a
//! fixed backoff between attempts and a 24h ceiling, after which the
//! agent is dropped from rotation rather than retried forever. Shaped
//! after `monitoring/mod.rs`'s shutdown-channel idiom: an mpsc control
//! channel plus a `tokio::select!` loop owning a `JoinHandle`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::agent_client::AgentClient;
use crate::constants::{RECOVERY_BACKOFF_SECS, RECOVERY_CEILING_SECS};
use crate::models::{AgentStatus, BrokenReason};
use crate::registry::AgentRegistry;

/// Handle given to callers that need to enqueue an agent for recovery
/// (the Dispatcher, the Discovery loop). Cheap to clone.
#[derive(Clone)]
pub struct RecoverySender {
    tx: mpsc::Sender<String>,
}

impl RecoverySender {
    pub async fn enqueue(&self, agent_id: String) {
        if self.tx.send(agent_id).await.is_err() {
            warn!("recovery loop is not running; drop silently");
        }
    }
}

pub struct RecoveryLoop {
    registry: AgentRegistry,
    client: AgentClient,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
    requeue_tx: mpsc::Sender<String>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RecoveryLoop {
    /// Builds the loop and its sender half together; the channel is
    /// unbounded-enough in practice (capacity 256) since a recovery
    /// enqueue must never block the dispatch path that triggers it.
    pub fn new(registry: AgentRegistry, client: AgentClient) -> (Arc<Self>, RecoverySender) {
        let (tx, rx) = mpsc::channel(256);
        let recovery_loop = Arc::new(Self {
            registry,
            client,
            rx: Mutex::new(Some(rx)),
            requeue_tx: tx.clone(),
            shutdown_tx: Mutex::new(None),
            handle: Mutex::new(None),
        });
        (recovery_loop, RecoverySender { tx })
    }

    /// Consumes queued agent ids in FIFO order. Each attempt either
    /// clears BROKEN (probe succeeds for Offline, cancel+probe
    /// succeeds for TaskStuck) or re-enqueues itself after a fixed
    /// backoff, unless it has aged past the 24h ceiling.
    pub async fn start(self: &Arc<Self>) {
        let mut rx = match self.rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("recovery loop already started");
                return;
            }
        };

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // age tracks how long each agent_id has been cycling through
            // the queue; reset whenever a fresh enqueue for that id
            // arrives (a new failure resets the clock).
            let mut first_seen: std::collections::HashMap<String, std::time::Instant> = std::collections::HashMap::new();

            loop {
                tokio::select! {
                    maybe_id = rx.recv() => {
                        let Some(agent_id) = maybe_id else {
                            info!("recovery channel closed, stopping loop");
                            break;
                        };
                        let started_at = *first_seen.entry(agent_id.clone()).or_insert_with(std::time::Instant::now);
                        if started_at.elapsed() > Duration::from_secs(RECOVERY_CEILING_SECS) {
                            warn!("agent {} exceeded recovery ceiling, dropping from rotation", agent_id);
                            this.registry.remove(&agent_id).await;
                            first_seen.remove(&agent_id);
                            continue;
                        }

                        if this.attempt_recovery(&agent_id).await {
                            info!("agent {} recovered", agent_id);
                            first_seen.remove(&agent_id);
                        } else {
                            let tx = this.requeue_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_secs(RECOVERY_BACKOFF_SECS)).await;
                                let _ = tx.send(agent_id).await;
                            });
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("recovery loop shutting down gracefully");
                        break;
                    }
                }
            }
        });

        *self.handle.lock().await = Some(handle);
    }

    pub async fn shutdown(&self) {
        info!("shutting down recovery loop...");
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("recovery loop task panicked: {}", e);
            }
        }
    }

    /// One recovery attempt per §4.4.
    async fn attempt_recovery(&self, agent_id: &str) -> bool {
        let Some(card) = self.registry.get_card(agent_id).await else {
            return true; // agent no longer registered, nothing to recover
        };
        let context = self.registry.get_context(agent_id).await.unwrap_or_default();

        match context.broken_reason {
            Some(BrokenReason::Offline) | None => {
                let reachable = self.client.probe_reachable(&card.url).await;
                if reachable {
                    self.registry.update_status(agent_id, AgentStatus::Available, None, None).await;
                }
                reachable
            }
            Some(BrokenReason::TaskStuck) => {
                let mut canceled = false;
                if let Some(task_id) = &context.stuck_task_id {
                    canceled = self
                        .client
                        .cancel_task(&card.url, task_id)
                        .await
                        .map(|resp| resp.state == crate::models::RemoteTaskState::Canceled)
                        .unwrap_or(false);
                }
                let reachable = self.client.probe_reachable(&card.url).await;

                if canceled || reachable {
                    self.registry.update_status(agent_id, AgentStatus::Available, None, None).await;
                    true
                } else {
                    self.registry
                        .update_status(agent_id, AgentStatus::Broken, Some(BrokenReason::Offline), context.stuck_task_id.clone())
                        .await;
                    false
                }
            }
        }
    }
}
