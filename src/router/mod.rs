//! Capability-based agent selection via an external oracle (§4.5). The
//! oracle itself is out of scope (§1) — this module only enforces the
//! contract around it: pass only AVAILABLE agents, validate the
//! answer, never fabricate an id.

use async_trait::async_trait;

use crate::models::AgentId;
use crate::registry::AgentRegistry;

/// A candidate agent as presented to the oracle.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub skills: Vec<String>,
}

/// The external, non-deterministic selection function. Implementations
/// may back it with an LLM, a rule engine, or round-robin — the
/// contract is unchanged (§9).
#[async_trait]
pub trait RoutingOracle: Send + Sync {
    async fn select_one(&self, task_description: &str, candidates: &[Candidate]) -> Option<AgentId>;
    async fn select_many(&self, capability_label: &str, candidates: &[Candidate]) -> Vec<AgentId>;
}

/// A deterministic stub for tests (§9): picks the first candidate
/// whose description or skills mention the capability label, or the
/// first candidate at all when selecting one for a free-text task.
pub struct RoundRobinOracle;

#[async_trait]
impl RoutingOracle for RoundRobinOracle {
    async fn select_one(&self, _task_description: &str, candidates: &[Candidate]) -> Option<AgentId> {
        candidates.first().map(|c| c.id.clone())
    }

    async fn select_many(&self, capability_label: &str, candidates: &[Candidate]) -> Vec<AgentId> {
        candidates
            .iter()
            .filter(|c| {
                c.description.to_lowercase().contains(&capability_label.to_lowercase())
                    || c.skills.iter().any(|s| s.to_lowercase().contains(&capability_label.to_lowercase()))
            })
            .map(|c| c.id.clone())
            .collect()
    }
}

pub struct Router {
    registry: AgentRegistry,
    oracle: std::sync::Arc<dyn RoutingOracle>,
}

impl Router {
    pub fn new(registry: AgentRegistry, oracle: std::sync::Arc<dyn RoutingOracle>) -> Self {
        Self { registry, oracle }
    }

    async fn available_candidates(&self) -> Vec<Candidate> {
        let ids = self.registry.get_available_agents().await;
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(card) = self.registry.get_card(&id).await {
                candidates.push(Candidate {
                    id,
                    name: card.name,
                    description: card.description,
                    skills: card.skills.into_iter().map(|s| s.description).collect(),
                });
            }
        }
        candidates
    }

    /// Picks one agent for a single dispatch. Validates the oracle's
    /// answer against the submitted set and current status (§4.5);
    /// returns `None` rather than fabricating an id.
    pub async fn select_one(&self, task_description: &str) -> Option<AgentId> {
        let candidates = self.available_candidates().await;
        let picked = self.oracle.select_one(task_description, &candidates).await?;

        let still_candidate = candidates.iter().any(|c| c.id == picked);
        if !still_candidate {
            return None;
        }
        if self.registry.get_status(&picked).await != crate::models::AgentStatus::Available {
            return None;
        }
        Some(picked)
    }

    /// Picks all suitable agents for a capability label (bulk
    /// execution), re-validating each returned id the same way.
    pub async fn select_many(&self, capability_label: &str) -> Vec<AgentId> {
        let candidates = self.available_candidates().await;
        let picked = self.oracle.select_many(capability_label, &candidates).await;

        let mut valid = Vec::new();
        for id in picked {
            let in_set = candidates.iter().any(|c| c.id == id);
            if in_set && self.registry.get_status(&id).await == crate::models::AgentStatus::Available {
                valid.push(id);
            }
        }
        valid
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }
}
