use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Orchestrator-assigned opaque id, stable for the lifetime of a
/// registry entry. Generated at first-registration, never reused.
pub type AgentId = String;

/// An agent's self-description, fetched over HTTP at
/// `<base_url>/.well-known/agent-card.json`. `url` is the stable
/// identity of an agent — two cards with the same `url` denote the
/// same agent (§3 invariant 4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub skills: Vec<Skill>,
}

/// `description` is free text consumed by the routing oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Skill {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Available,
    Busy,
    Broken,
}

/// Only meaningful when status = Broken (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokenReason {
    Offline,
    TaskStuck,
}

/// Per-agent metadata cleared on transition to Available.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentContext {
    pub current_task_id: Option<String>,
    pub broken_reason: Option<BrokenReason>,
    pub stuck_task_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One record per attempted dispatch (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub description: String,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Decoded body of any log artifact the agent returned.
    pub agent_logs: Option<String>,
}

impl TaskRecord {
    pub fn new(task_id: String, agent_id: AgentId, agent_name: String, description: String) -> Self {
        Self {
            task_id,
            agent_id,
            agent_name,
            description,
            status: TaskStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
            agent_logs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
    pub module: Option<String>,
    pub traceback_snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub logger_name: String,
    pub message: String,
    pub task_id: Option<String>,
    pub agent_id: Option<String>,
}

/// An ordered part of an artifact returned by an agent for a completed
/// task. Text parts carry JSON payloads in workflow-specific schemas;
/// file parts carry binary blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    File { name: String, mime_type: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Artifact {
    pub parts: Vec<Part>,
}

impl Artifact {
    /// The first text part, by convention the workflow-specific JSON
    /// payload to hand to the next stage (§6 "Artifacts").
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            Part::File { .. } => None,
        })
    }

    /// File parts whose name contains "log" (case-insensitive) and
    /// whose suffix is `.txt` or `.log` — treated as agent execution
    /// logs (§6 "Artifacts").
    pub fn log_file_parts(&self) -> Vec<(&str, &[u8])> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::File { name, bytes, .. } => {
                    let lower = name.to_lowercase();
                    let is_log_name = lower.contains("log");
                    let is_log_suffix = lower.ends_with(".txt") || lower.ends_with(".log");
                    (is_log_name && is_log_suffix).then_some((name.as_str(), bytes.as_slice()))
                }
                Part::Text { .. } => None,
            })
            .collect()
    }

    /// All file parts other than recognised log files — preserved for
    /// re-sending on downstream dispatches (e.g. incident creation).
    pub fn non_log_file_parts(&self) -> Vec<&Part> {
        self.parts
            .iter()
            .filter(|p| match p {
                Part::File { name, .. } => {
                    let lower = name.to_lowercase();
                    !(lower.contains("log") && (lower.ends_with(".txt") || lower.ends_with(".log")))
                }
                Part::Text { .. } => false,
            })
            .collect()
    }
}

/// Terminal (and non-terminal) task states reported over the
/// southbound RPC transport (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTaskState {
    Submitted,
    Working,
    Completed,
    Failed,
    Rejected,
    Canceled,
}

impl RemoteTaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemoteTaskState::Completed | RemoteTaskState::Failed | RemoteTaskState::Rejected
        )
    }
}
