//! The atomic reserve -> send -> await -> release cycle (§4.6), the
//! heart of the orchestrator. One dispatch attempt is the atomic unit
//! of work.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent_client::{AgentClient, OutgoingFile, OutgoingMessage};
use crate::constants::{SELECTION_BACKOFF_CAP_MS, SELECTION_BACKOFF_FACTOR, SELECTION_BACKOFF_START_MS};
use crate::history::{ErrorHistory, TaskHistory};
use crate::models::{AgentStatus, Artifact, BrokenReason, ErrorRecord, RemoteTaskState, TaskRecord, TaskStatus};
use crate::recovery::RecoverySender;
use crate::registry::AgentRegistry;
use crate::router::Router;
use crate::{OrchestratorError, Result};

/// The successful outcome of one dispatch attempt.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub task_record: TaskRecord,
    pub artifacts: Vec<Artifact>,
    pub remote_state: RemoteTaskState,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: AgentRegistry,
    router: Arc<Router>,
    client: AgentClient,
    task_history: TaskHistory,
    error_history: ErrorHistory,
    recovery: RecoverySender,
    /// Distinct from the registry lock: serialises the wait-and-reserve
    /// loop so only one dispatch evaluates candidates at a time (§4.6,
    /// §9 "Concurrent mutation of registry").
    selection_lock: Arc<AsyncMutex<()>>,
}

impl Dispatcher {
    pub fn new(
        registry: AgentRegistry,
        router: Arc<Router>,
        client: AgentClient,
        task_history: TaskHistory,
        error_history: ErrorHistory,
        recovery: RecoverySender,
    ) -> Self {
        Self {
            registry,
            router,
            client,
            task_history,
            error_history,
            recovery,
            selection_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    async fn record_error(&self, message: impl Into<String>, task_id: Option<String>, agent_id: Option<String>) {
        self.error_history
            .add(ErrorRecord {
                error_id: uuid::Uuid::new_v4().to_string(),
                timestamp: chrono::Utc::now(),
                message: message.into(),
                task_id,
                agent_id,
                module: Some("dispatcher".to_string()),
                traceback_snippet: None,
            })
            .await;
    }

    /// Step 1: wait-and-reserve. Loops under the selection lock,
    /// snapshotting AVAILABLE ids, calling the router, and re-checking
    /// status under the registry lock before committing to BUSY.
    async fn wait_and_reserve(&self, task_description: &str, deadline: Instant) -> Result<String> {
        let mut backoff_ms = SELECTION_BACKOFF_START_MS;

        loop {
            let _guard = self.selection_lock.lock().await;

            let available = self.registry.get_available_agents().await;
            if available.is_empty() {
                // Empty registry: fail fast, no agent will ever show up
                // (§7, property #9). A registry with entries that are
                // all BUSY/BROKEN instead waits out the deadline and
                // surfaces ReservationTimeout (property #10).
                if self.registry.is_empty().await {
                    return Err(OrchestratorError::NoAgents);
                }

                drop(_guard);
                if Instant::now() >= deadline {
                    return Err(OrchestratorError::ReservationTimeout);
                }
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = ((backoff_ms as f64) * SELECTION_BACKOFF_FACTOR) as u64;
                backoff_ms = backoff_ms.min(SELECTION_BACKOFF_CAP_MS);
                continue;
            }

            let Some(picked) = self.router.select_one(task_description).await else {
                return Err(OrchestratorError::NoneSuitable);
            };

            // Re-check under the same critical section before committing.
            if self.registry.get_status(&picked).await == AgentStatus::Available {
                self.registry
                    .update_status(&picked, AgentStatus::Busy, None, None)
                    .await;
                return Ok(picked);
            }

            drop(_guard);
            if Instant::now() >= deadline {
                return Err(OrchestratorError::ReservationTimeout);
            }
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = ((backoff_ms as f64) * SELECTION_BACKOFF_FACTOR) as u64;
            backoff_ms = backoff_ms.min(SELECTION_BACKOFF_CAP_MS);
        }
    }

    /// One end-to-end dispatch attempt, per the sequence in §4.6.
    pub async fn dispatch(
        &self,
        task_description: String,
        message_text: String,
        files: Vec<OutgoingFile>,
        overall_timeout: Duration,
    ) -> Result<DispatchOutcome> {
        let deadline = Instant::now() + overall_timeout;

        let agent_id = self.wait_and_reserve(&task_description, deadline).await?;
        let agent_name = self.registry.get_name(&agent_id).await;
        let card = match self.registry.get_card(&agent_id).await {
            Some(c) => c,
            None => {
                self.registry.update_status(&agent_id, AgentStatus::Available, None, None).await;
                return Err(OrchestratorError::AgentCrashed {
                    message: "agent vanished from registry after reservation".to_string(),
                });
            }
        };

        let task_id = uuid::Uuid::new_v4().to_string();
        let mut record = TaskRecord::new(task_id.clone(), agent_id.clone(), agent_name, task_description.clone());
        record.status = TaskStatus::Running;
        self.task_history.add(record.clone()).await;
        self.registry.set_current_task(&agent_id, Some(task_id.clone())).await;

        let message = OutgoingMessage { text: message_text, files };

        let result = tokio::time::timeout_at(deadline, self.drive_stream(&card.url, message)).await;

        match result {
            Err(_) => self.handle_timeout(&agent_id, &task_id, None).await,
            Ok(Err(e)) => self.handle_transport_error(&agent_id, &task_id, e).await,
            Ok(Ok(StreamOutcome::Terminal { state, artifacts, remote_task_id })) => {
                self.handle_terminal(&agent_id, &task_id, state, artifacts, remote_task_id).await
            }
            Ok(Ok(StreamOutcome::ProtocolError { message })) => {
                self.handle_protocol_error(&agent_id, &task_id, message).await
            }
        }
    }

    async fn drive_stream(&self, url: &str, message: OutgoingMessage) -> Result<StreamOutcome> {
        let mut stream = Box::pin(self.client.send_message(url, message).await?);
        let mut last_remote_task_id: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event? {
                crate::agent_client::Event::TaskSnapshot { task_id, state, artifacts } => {
                    last_remote_task_id = Some(task_id.clone());
                    if state.is_terminal() {
                        return Ok(StreamOutcome::Terminal {
                            state,
                            artifacts,
                            remote_task_id: Some(task_id),
                        });
                    }
                    debug!("intermediate task snapshot for {}: {:?}", task_id, state);
                }
                crate::agent_client::Event::ProgressMessage { text } => {
                    info!("agent progress: {}", text);
                }
                crate::agent_client::Event::Error { message } => {
                    return Ok(StreamOutcome::ProtocolError { message });
                }
            }
        }

        Ok(StreamOutcome::ProtocolError {
            message: match last_remote_task_id {
                Some(id) => format!("stream ended before terminal state for remote task {id}"),
                None => "stream ended before any terminal state".to_string(),
            },
        })
    }

    /// §4.6 step 4: on timeout, finalise FAILED, mark BROKEN(TASK_STUCK),
    /// enqueue recovery.
    async fn handle_timeout(&self, agent_id: &str, task_id: &str, remote_task_id: Option<String>) -> Result<DispatchOutcome> {
        warn!("dispatch {} timed out on agent {}", task_id, agent_id);
        self.task_history
            .update(task_id, TaskStatus::Failed, Some(chrono::Utc::now()), Some("timed out".to_string()), None)
            .await;
        self.registry
            .update_status(agent_id, AgentStatus::Broken, Some(BrokenReason::TaskStuck), remote_task_id.or_else(|| Some(task_id.to_string())))
            .await;
        self.recovery.enqueue(agent_id.to_string()).await;
        self.record_error("task execution timed out", Some(task_id.to_string()), Some(agent_id.to_string())).await;
        Err(OrchestratorError::TimedOut { message: format!("task {task_id} timed out") })
    }

    /// §4.6 step 5: any other transport exception marks BROKEN(OFFLINE).
    async fn handle_transport_error(&self, agent_id: &str, task_id: &str, error: OrchestratorError) -> Result<DispatchOutcome> {
        warn!("transport error dispatching {} to {}: {}", task_id, agent_id, error);
        self.task_history
            .update(task_id, TaskStatus::Failed, Some(chrono::Utc::now()), Some(error.to_string()), None)
            .await;
        self.registry
            .update_status(agent_id, AgentStatus::Broken, Some(BrokenReason::Offline), None)
            .await;
        self.recovery.enqueue(agent_id.to_string()).await;
        self.record_error(format!("transport error: {error}"), Some(task_id.to_string()), Some(agent_id.to_string())).await;
        Err(OrchestratorError::AgentCrashed { message: error.to_string() })
    }

    /// §4.6 step 3 protocol-error branches: JSON-RPC error envelope or
    /// stream end before terminal state. Task-level failure only —
    /// the agent is released AVAILABLE, not demoted.
    async fn handle_protocol_error(&self, agent_id: &str, task_id: &str, message: String) -> Result<DispatchOutcome> {
        warn!("protocol error dispatching {} to {}: {}", task_id, agent_id, message);
        self.task_history
            .update(task_id, TaskStatus::Failed, Some(chrono::Utc::now()), Some(message.clone()), None)
            .await;
        self.registry.update_status(agent_id, AgentStatus::Available, None, None).await;
        self.registry.set_current_task(agent_id, None).await;
        self.record_error(format!("protocol error: {message}"), Some(task_id.to_string()), Some(agent_id.to_string())).await;
        Err(OrchestratorError::ProtocolError { message })
    }

    /// §4.6 step 6: success path, including agents that reach a
    /// terminal `failed` or `rejected` state cleanly (still a
    /// task-level outcome, agent released AVAILABLE).
    async fn handle_terminal(
        &self,
        agent_id: &str,
        task_id: &str,
        state: RemoteTaskState,
        artifacts: Vec<Artifact>,
        _remote_task_id: Option<String>,
    ) -> Result<DispatchOutcome> {
        let agent_logs = extract_log_text(&artifacts);
        let (status, error_message) = match state {
            RemoteTaskState::Completed => (TaskStatus::Completed, None),
            RemoteTaskState::Failed | RemoteTaskState::Rejected => {
                (TaskStatus::Failed, Some(format!("remote state: {state:?}")))
            }
            _ => (TaskStatus::Failed, Some(format!("unexpected terminal state: {state:?}"))),
        };

        self.task_history
            .update(task_id, status, Some(chrono::Utc::now()), error_message.clone(), agent_logs)
            .await;
        self.registry.update_status(agent_id, AgentStatus::Available, None, None).await;
        self.registry.set_current_task(agent_id, None).await;

        let record = self.task_history.get_by_id(task_id).await.ok_or_else(|| {
            OrchestratorError::AdapterFailure { message: "task record vanished after finalisation".to_string() }
        })?;

        if matches!(state, RemoteTaskState::Failed | RemoteTaskState::Rejected) && artifacts.is_empty() {
            self.record_error("agent returned terminal failed state with no artifacts", Some(task_id.to_string()), Some(agent_id.to_string())).await;
            return Err(OrchestratorError::ProtocolError {
                message: "agent returned terminal failed state with no artifacts".to_string(),
            });
        }

        Ok(DispatchOutcome { task_record: record, artifacts, remote_state: state })
    }
}

enum StreamOutcome {
    Terminal {
        state: RemoteTaskState,
        artifacts: Vec<Artifact>,
        remote_task_id: Option<String>,
    },
    ProtocolError {
        message: String,
    },
}

/// Decodes and concatenates any log-file artifact parts (§6
/// "Artifacts"): file parts whose name contains "log" and whose
/// suffix is `.txt` or `.log`.
fn extract_log_text(artifacts: &[Artifact]) -> Option<String> {
    let mut chunks = Vec::new();
    for artifact in artifacts {
        for (_name, bytes) in artifact.log_file_parts() {
            chunks.push(String::from_utf8_lossy(bytes).into_owned());
        }
    }
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_log_text_ignores_non_log_files() {
        let artifact = Artifact {
            parts: vec![
                crate::models::Part::File {
                    name: "output.json".to_string(),
                    mime_type: "application/json".to_string(),
                    bytes: b"{}".to_vec(),
                },
                crate::models::Part::File {
                    name: "agent.log".to_string(),
                    mime_type: "text/plain".to_string(),
                    bytes: b"hello".to_vec(),
                },
            ],
        };
        assert_eq!(extract_log_text(&[artifact]).as_deref(), Some("hello"));
    }

    fn test_dispatcher() -> Dispatcher {
        let registry = AgentRegistry::new();
        let client = AgentClient::new();
        let router = Arc::new(Router::new(registry.clone(), Arc::new(crate::router::RoundRobinOracle)));
        let (_recovery_loop, recovery_tx) = crate::recovery::RecoveryLoop::new(registry.clone(), client.clone());
        Dispatcher::new(registry, router, client, TaskHistory::new(10), ErrorHistory::new(10), recovery_tx)
    }

    #[tokio::test]
    async fn empty_registry_fails_fast_with_no_agents() {
        let dispatcher = test_dispatcher();
        let deadline = Instant::now() + Duration::from_secs(30);
        let started = Instant::now();
        let result = dispatcher.wait_and_reserve("do something", deadline).await;
        assert!(matches!(result, Err(OrchestratorError::NoAgents)));
        assert!(started.elapsed() < Duration::from_secs(1), "should not wait out the deadline on an empty registry");
    }

    #[tokio::test]
    async fn all_broken_registry_waits_out_deadline_then_reservation_timeout() {
        let dispatcher = test_dispatcher();
        dispatcher
            .registry
            .register("a1".to_string(), crate::models::AgentCard {
                name: "Stuck".to_string(),
                description: "stuck agent".to_string(),
                url: "http://127.0.0.1:1".to_string(),
                version: "1.0.0".to_string(),
                capabilities: vec![],
                skills: vec![],
            })
            .await;
        dispatcher.registry.update_status("a1", AgentStatus::Broken, Some(BrokenReason::Offline), None).await;

        let deadline = Instant::now() + Duration::from_millis(150);
        let result = dispatcher.wait_and_reserve("do something", deadline).await;
        assert!(matches!(result, Err(OrchestratorError::ReservationTimeout)));
    }
}
