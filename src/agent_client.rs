//! Southbound RPC client: card fetch, reachability probe, streamed
//! message dispatch, and task cancellation (§6 "Agent RPC").
//!
//! The wire format is newline-delimited JSON events over a chunked
//! HTTP response body; the orchestrator's own state machine (§4.6)
//! depends only on the `Event` variants below and their ordering, per
//! the design note in §9 ("Streaming RPC").

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::constants::DISCOVERY_PROBE_TIMEOUT_SECS;
use crate::models::{AgentCard, Artifact, RemoteTaskState};
use crate::{OrchestratorError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub text: String,
    pub files: Vec<OutgoingFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub bytes_base64: String,
}

/// One event from the southbound stream: either a task snapshot
/// (carrying state + artifacts) or an informational progress message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    TaskSnapshot {
        task_id: String,
        state: RemoteTaskState,
        artifacts: Vec<Artifact>,
    },
    ProgressMessage {
        text: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelResponse {
    pub state: RemoteTaskState,
}

#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn fetch_card(&self, base_url: &str) -> Result<AgentCard> {
        let url = format!("{}/.well-known/agent-card.json", base_url.trim_end_matches('/'));
        let card = self.http.get(url).send().await?.error_for_status()?.json().await?;
        Ok(card)
    }

    /// Cheap reachability probe, distinct from a full card fetch
    /// (§4.3): bounded, short timeout, never propagates errors up.
    pub async fn probe_reachable(&self, base_url: &str) -> bool {
        let url = format!("{}/.well-known/agent-card.json", base_url.trim_end_matches('/'));
        self.http
            .head(&url)
            .timeout(Duration::from_secs(DISCOVERY_PROBE_TIMEOUT_SECS))
            .send()
            .await
            .map(|resp| resp.status().is_success() || resp.status().is_redirection())
            .unwrap_or(false)
    }

    /// Opens a single streaming call and returns the decoded event
    /// stream. Consuming code drives it to a terminal event per §4.6.
    pub async fn send_message(
        &self,
        url: &str,
        message: OutgoingMessage,
    ) -> Result<impl futures::Stream<Item = Result<Event>>> {
        let response = self
            .http
            .post(url)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;

        struct State<S> {
            stream: std::pin::Pin<Box<S>>,
            buffer: Vec<u8>,
            pending: std::collections::VecDeque<Result<Event>>,
            done: bool,
        }

        let initial = State {
            stream: Box::pin(response.bytes_stream()),
            buffer: Vec::new(),
            pending: std::collections::VecDeque::new(),
            done: false,
        };

        // NDJSON lines are not aligned to chunk boundaries: a terminal
        // event's JSON can straddle two `bytes_stream()` chunks, so
        // lines are only parsed once a `\n` has actually been seen,
        // with the trailing fragment carried over to the next chunk.
        let event_stream = futures::stream::unfold(initial, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                if state.done {
                    return None;
                }

                match state.stream.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.extend_from_slice(&bytes);
                        drain_complete_lines(&mut state.buffer, &mut state.pending);
                    }
                    Some(Err(e)) => {
                        state.pending.push_back(Err(OrchestratorError::from(e)));
                        state.done = true;
                    }
                    None => {
                        state.done = true;
                        let remainder = std::mem::take(&mut state.buffer);
                        let line = String::from_utf8_lossy(&remainder);
                        let line = line.trim();
                        if !line.is_empty() {
                            state.pending.push_back(serde_json::from_str::<Event>(line).map_err(OrchestratorError::from));
                        }
                    }
                }
            }
        });

        Ok(event_stream)
    }

    pub async fn cancel_task(&self, url: &str, task_id: &str) -> Result<CancelResponse> {
        let cancel_url = format!("{}/tasks/{}/cancel", url.trim_end_matches('/'), task_id);
        let resp = self
            .http
            .post(cancel_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp)
    }
}

/// Splits complete `\n`-terminated lines out of `buffer`, parses each
/// as an `Event`, and appends the results to `pending`. Any trailing
/// partial line (no `\n` yet) is left in `buffer` for the next chunk.
fn drain_complete_lines(buffer: &mut Vec<u8>, pending: &mut std::collections::VecDeque<Result<Event>>) {
    loop {
        let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') else {
            break;
        };
        let line_bytes: Vec<u8> = buffer.drain(..=newline_pos).collect();
        let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        pending.push_back(serde_json::from_str::<Event>(line).map_err(OrchestratorError::from));
    }
}
