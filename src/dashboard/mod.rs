//! Read-only aggregator over the registry and histories (§4.9). The
//! only non-trivial logic is `get_logs`, which parses agent-provided
//! log artifacts against the canonical log line shape emitted by the
//! in-process logger (`logging.rs`): `"<timestamp> - <logger> -
//! <level> - <message>"`.

use serde::Serialize;

use crate::history::{ErrorHistory, LogHistory, TaskHistory};
use crate::models::{AgentStatus, ErrorRecord, LogEntry, TaskRecord};
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_agents: usize,
    pub available_agents: usize,
    pub busy_agents: usize,
    pub broken_agents: usize,
    pub total_tasks: usize,
    pub total_errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusView {
    pub agent_id: String,
    pub name: String,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
}

#[derive(Clone)]
pub struct Dashboard {
    registry: AgentRegistry,
    task_history: TaskHistory,
    error_history: ErrorHistory,
    log_history: LogHistory,
}

impl Dashboard {
    pub fn new(registry: AgentRegistry, task_history: TaskHistory, error_history: ErrorHistory, log_history: LogHistory) -> Self {
        Self {
            registry,
            task_history,
            error_history,
            log_history,
        }
    }

    pub async fn get_summary(&self) -> Summary {
        let cards = self.registry.get_all_cards().await;
        let mut available = 0;
        let mut busy = 0;
        let mut broken = 0;
        for id in cards.keys() {
            match self.registry.get_status(id).await {
                AgentStatus::Available => available += 1,
                AgentStatus::Busy => busy += 1,
                AgentStatus::Broken => broken += 1,
            }
        }

        Summary {
            total_agents: cards.len(),
            available_agents: available,
            busy_agents: busy,
            broken_agents: broken,
            total_tasks: self.task_history.len().await,
            total_errors: self.error_history.len().await,
        }
    }

    pub async fn get_agents_status(&self) -> Vec<AgentStatusView> {
        let cards = self.registry.get_all_cards().await;
        let mut views = Vec::with_capacity(cards.len());
        for (id, card) in cards {
            let status = self.registry.get_status(&id).await;
            let current_task_id = self.registry.get_current_task(&id).await;
            views.push(AgentStatusView {
                agent_id: id,
                name: card.name,
                status,
                current_task_id,
            });
        }
        views
    }

    pub async fn get_recent_tasks(&self, limit: usize) -> Vec<TaskRecord> {
        self.task_history.get_all().await.into_iter().take(limit).collect()
    }

    pub async fn get_recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        self.error_history.get_recent(limit).await
    }

    /// In-process orchestrator logs, unrelated to agent-log parsing
    /// below.
    pub async fn get_logs(&self, limit: usize, level: Option<&str>) -> Vec<LogEntry> {
        self.log_history.get_logs(limit, level)
    }

    /// Decodes a task's preserved `agent_logs` blob into structured
    /// entries via the canonical-format parser (§4.9), optionally
    /// restricted to one log level.
    pub async fn get_agent_logs_for_task(&self, task_id: &str, level: Option<&str>) -> Vec<LogEntry> {
        let Some(record) = self.task_history.get_by_id(task_id).await else {
            return Vec::new();
        };
        let Some(blob) = record.agent_logs else {
            return Vec::new();
        };
        let entries = parse_agent_log_blob(&blob, Some(task_id.to_string()), Some(record.agent_id));
        filter_by_level(entries, level)
    }

    /// Decodes every task's preserved `agent_logs` blob for one agent,
    /// newest task first, optionally restricted to one log level.
    pub async fn get_agent_logs_for_agent(&self, agent_id: &str, level: Option<&str>) -> Vec<LogEntry> {
        let entries: Vec<LogEntry> = self
            .task_history
            .get_all()
            .await
            .into_iter()
            .filter(|record| record.agent_id == agent_id)
            .flat_map(|record| {
                let blob = record.agent_logs.unwrap_or_default();
                parse_agent_log_blob(&blob, Some(record.task_id.clone()), Some(record.agent_id.clone()))
            })
            .collect();
        filter_by_level(entries, level)
    }
}

/// Case-insensitive exact level match, mirroring `LogHistory::get_logs`.
fn filter_by_level(entries: Vec<LogEntry>, level: Option<&str>) -> Vec<LogEntry> {
    let Some(level) = level else {
        return entries;
    };
    entries.into_iter().filter(|entry| entry.level.eq_ignore_ascii_case(level)).collect()
}

/// Parses the canonical log line shape `"<timestamp> - <logger> -
/// <level> - <message>"`, degrading gracefully per §4.9: missing
/// timestamp becomes an empty string, missing level becomes INFO,
/// and an unrecognised shape is kept whole as the message.
fn parse_log_line(line: &str) -> (String, String, String, String) {
    let parts: Vec<&str> = line.splitn(4, " - ").collect();
    match parts.as_slice() {
        [timestamp, logger, level, message] => {
            (timestamp.to_string(), logger.to_string(), level.to_string(), message.to_string())
        }
        [timestamp, logger, rest] => {
            (timestamp.to_string(), logger.to_string(), "INFO".to_string(), rest.to_string())
        }
        _ => (String::new(), String::new(), "INFO".to_string(), line.to_string()),
    }
}

fn parse_agent_log_blob(blob: &str, task_id: Option<String>, agent_id: Option<String>) -> Vec<LogEntry> {
    blob.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (timestamp, logger_name, level, message) = parse_log_line(line);
            LogEntry {
                timestamp,
                level,
                logger_name,
                message,
                task_id: task_id.clone(),
                agent_id: agent_id.clone(),
            }
        })
        .collect()
}
