//! Process-wide agent registry: `agent_id -> (card, status, context)`.
//!
//! All operations serialise under a single mutex; no operation blocks
//! on I/O while holding it (§4.1, §3 invariant 5).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::models::{AgentCard, AgentContext, AgentId, AgentStatus, BrokenReason};

struct Entry {
    card: AgentCard,
    status: AgentStatus,
    context: AgentContext,
}

#[derive(Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<Mutex<HashMap<AgentId, Entry>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: unknown id is added AVAILABLE; a known id has its
    /// card replaced but its status is never downgraded away from
    /// whatever it already is (§4.1).
    pub async fn register(&self, id: AgentId, card: AgentCard) {
        let mut agents = self.inner.lock().await;
        match agents.get_mut(&id) {
            Some(entry) => entry.card = card,
            None => {
                agents.insert(
                    id,
                    Entry {
                        card,
                        status: AgentStatus::Available,
                        context: AgentContext::default(),
                    },
                );
            }
        }
    }

    /// Enforces the state machine in §4.1: transitioning to Broken sets
    /// `broken_reason` (and `stuck_task_id` if given); transitioning to
    /// Available clears all context (§3 invariant 3). A no-op
    /// Available->Available still clears context.
    pub async fn update_status(
        &self,
        id: &str,
        status: AgentStatus,
        reason: Option<BrokenReason>,
        stuck_task_id: Option<String>,
    ) {
        let mut agents = self.inner.lock().await;
        let Some(entry) = agents.get_mut(id) else {
            return;
        };
        entry.status = status;
        match status {
            AgentStatus::Broken => {
                entry.context.broken_reason = reason;
                if stuck_task_id.is_some() {
                    entry.context.stuck_task_id = stuck_task_id;
                }
            }
            AgentStatus::Available => {
                entry.context = AgentContext::default();
            }
            AgentStatus::Busy => {}
        }
    }

    pub async fn set_current_task(&self, id: &str, task_id: Option<String>) {
        let mut agents = self.inner.lock().await;
        if let Some(entry) = agents.get_mut(id) {
            entry.context.current_task_id = task_id;
        }
    }

    pub async fn get_card(&self, id: &str) -> Option<AgentCard> {
        self.inner.lock().await.get(id).map(|e| e.card.clone())
    }

    pub async fn get_name(&self, id: &str) -> String {
        self.inner
            .lock()
            .await
            .get(id)
            .map(|e| e.card.name.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Defaults to Broken for an unknown id (§9: the original registry
    /// follows this convention; an unknown agent can never be treated
    /// as reservable).
    pub async fn get_status(&self, id: &str) -> AgentStatus {
        self.inner
            .lock()
            .await
            .get(id)
            .map(|e| e.status)
            .unwrap_or(AgentStatus::Broken)
    }

    pub async fn get_context(&self, id: &str) -> Option<AgentContext> {
        self.inner.lock().await.get(id).map(|e| e.context.clone())
    }

    pub async fn get_current_task(&self, id: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .get(id)
            .and_then(|e| e.context.current_task_id.clone())
    }

    /// Snapshot of ids with status = Available (§4.1).
    pub async fn get_available_agents(&self) -> Vec<AgentId> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.status == AgentStatus::Available)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Snapshot of `{id -> (reason?, stuck_task_id?)}` for Broken
    /// agents (§4.1).
    pub async fn get_broken_agents(&self) -> HashMap<AgentId, (Option<BrokenReason>, Option<String>)> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|(_, e)| e.status == AgentStatus::Broken)
            .map(|(id, e)| (id.clone(), (e.context.broken_reason, e.context.stuck_task_id.clone())))
            .collect()
    }

    pub async fn get_all_cards(&self) -> HashMap<AgentId, AgentCard> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(id, e)| (id.clone(), e.card.clone()))
            .collect()
    }

    /// O(n) lookup used by Discovery (§4.1).
    pub async fn get_agent_id_by_url(&self, url: &str) -> Option<AgentId> {
        self.inner
            .lock()
            .await
            .iter()
            .find(|(_, e)| e.card.url == url)
            .map(|(id, _)| id.clone())
    }

    pub async fn remove(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(url: &str) -> AgentCard {
        AgentCard {
            name: "Reviewer".to_string(),
            description: "reviews things".to_string(),
            url: url.to_string(),
            version: "1.0.0".to_string(),
            capabilities: vec![],
            skills: vec![],
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_and_never_downgrades_status() {
        let registry = AgentRegistry::new();
        registry.register("a1".to_string(), card("http://a1")).await;
        registry
            .update_status("a1", AgentStatus::Busy, None, None)
            .await;

        registry.register("a1".to_string(), card("http://a1")).await;
        assert_eq!(registry.get_status("a1").await, AgentStatus::Busy);
    }

    #[tokio::test]
    async fn unknown_agent_defaults_to_broken() {
        let registry = AgentRegistry::new();
        assert_eq!(registry.get_status("missing").await, AgentStatus::Broken);
    }

    #[tokio::test]
    async fn transition_to_available_clears_context() {
        let registry = AgentRegistry::new();
        registry.register("a1".to_string(), card("http://a1")).await;
        registry
            .update_status("a1", AgentStatus::Broken, Some(BrokenReason::Offline), None)
            .await;
        registry.update_status("a1", AgentStatus::Available, None, None).await;

        let ctx = registry.get_context("a1").await.unwrap();
        assert!(ctx.broken_reason.is_none());
        assert!(ctx.current_task_id.is_none());
        assert!(ctx.stuck_task_id.is_none());
    }

    #[tokio::test]
    async fn get_agent_id_by_url_scans_cards() {
        let registry = AgentRegistry::new();
        registry.register("a1".to_string(), card("http://a1")).await;
        registry.register("a2".to_string(), card("http://a2")).await;

        assert_eq!(registry.get_agent_id_by_url("http://a2").await, Some("a2".to_string()));
        assert_eq!(registry.get_agent_id_by_url("http://missing").await, None);
    }
}
