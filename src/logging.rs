//! In-process log capture: a `tracing_subscriber` layer that mirrors
//! every event into a `LogHistory` ring buffer in the canonical shape
//! `"<timestamp> - <logger> - <level> - <message>"`, matching the
//! format the dashboard's agent-log parser expects (§4.9).

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::history::LogHistory;
use crate::models::LogEntry;

pub struct MemoryLogLayer {
    history: LogHistory,
}

impl MemoryLogLayer {
    pub fn new(history: LogHistory) -> Self {
        Self { history }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for MemoryLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let timestamp = chrono::Utc::now().to_rfc3339();
        let level = metadata.level().to_string();
        let logger_name = metadata.target().to_string();

        self.history.add(LogEntry {
            timestamp,
            level,
            logger_name,
            message: visitor.message,
            task_id: None,
            agent_id: None,
        });
    }
}

/// Renders an entry in the canonical shape the dashboard's parser
/// expects; used by tests to round-trip through `dashboard::parse_log_line`-
/// equivalent logic without depending on a live tracing subscriber.
pub fn format_canonical(entry: &LogEntry) -> String {
    format!("{} - {} - {} - {}", entry.timestamp, entry.logger_name, entry.level, entry.message)
}
