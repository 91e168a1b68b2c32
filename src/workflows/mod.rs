//! Thin compositions over the Dispatcher and Worker-Pool Scheduler
//! (§4.8). Each endpoint wires a handful of dispatches together; none
//! owns state of its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::models::{Artifact, Part};
use crate::router::Router;
use crate::scheduler::{ItemResult, WorkItem, WorkerPool};
use crate::{OrchestratorError, Result};

/// Narrow adapter interface onto the external test-management backend
/// (§1 "Out of scope"). The orchestrator core only needs the list of
/// work items grouped by capability label; how they are fetched and
/// stored is the adapter's concern.
#[async_trait]
pub trait TestManagementAdapter: Send + Sync {
    async fn list_items(&self) -> Result<Vec<TestItem>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestItem {
    pub item_id: String,
    pub capability_label: String,
    pub description: String,
}

/// Capability label reserved for items that don't belong to any
/// agent-matched pool and are excluded from grouping (§4.8).
pub const META_LABEL: &str = "meta";

pub struct Workflows {
    dispatcher: Arc<Dispatcher>,
    router: Arc<Router>,
    test_adapter: Arc<dyn TestManagementAdapter>,
    task_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewResult {
    pub text: String,
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateReviewResult {
    pub generated: String,
    pub classification: String,
    pub review: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteTestsResult {
    pub succeeded: usize,
    pub failed: usize,
    pub incidents_created: usize,
}

impl Workflows {
    pub fn new(dispatcher: Arc<Dispatcher>, router: Arc<Router>, test_adapter: Arc<dyn TestManagementAdapter>, task_timeout: Duration) -> Self {
        Self {
            dispatcher,
            router,
            test_adapter,
            task_timeout,
        }
    }

    fn single_text_artifact(outcome: &DispatchOutcome) -> Result<String> {
        let artifact = outcome.artifacts.first().ok_or_else(|| OrchestratorError::ProtocolError {
            message: "expected exactly one artifact, got none".to_string(),
        })?;
        artifact.first_text().map(str::to_string).ok_or_else(|| OrchestratorError::ProtocolError {
            message: "expected a text artifact".to_string(),
        })
    }

    /// **review**: one dispatch, expect exactly one text artifact.
    pub async fn review(&self, description: String) -> Result<ReviewResult> {
        let outcome = self
            .dispatcher
            .dispatch(description.clone(), description, Vec::new(), self.task_timeout)
            .await?;
        let text = Self::single_text_artifact(&outcome)?;
        Ok(ReviewResult {
            text,
            task_id: outcome.task_record.task_id,
        })
    }

    /// **generate + classify + review**: three serial dispatches, each
    /// fed the prior's output as input payload text.
    pub async fn generate_classify_review(&self, prompt: String) -> Result<GenerateReviewResult> {
        let generate_outcome = self
            .dispatcher
            .dispatch("generate".to_string(), prompt, Vec::new(), self.task_timeout)
            .await?;
        let generated = Self::single_text_artifact(&generate_outcome)?;

        let classify_outcome = self
            .dispatcher
            .dispatch("classify".to_string(), generated.clone(), Vec::new(), self.task_timeout)
            .await?;
        let classification = Self::single_text_artifact(&classify_outcome)?;

        let review_outcome = self
            .dispatcher
            .dispatch("review".to_string(), classification.clone(), Vec::new(), self.task_timeout)
            .await?;
        let review = Self::single_text_artifact(&review_outcome)?;

        Ok(GenerateReviewResult {
            generated,
            classification,
            review,
        })
    }

    /// **update-index**: one dispatch; the agent drives its own sync
    /// loop, so the workflow only needs the outcome's task id.
    pub async fn update_index(&self, description: String) -> Result<String> {
        let outcome = self
            .dispatcher
            .dispatch(description.clone(), description, Vec::new(), self.task_timeout)
            .await?;
        Ok(outcome.task_record.task_id)
    }

    /// **execute-tests**: fetch items, group by label (excluding the
    /// meta-label), select pools per label in parallel, drive the
    /// worker pool per label in parallel, then in parallel file an
    /// incident for every failed item (§4.8).
    pub async fn execute_tests(&self) -> Result<ExecuteTestsResult> {
        let items = self.test_adapter.list_items().await?;

        let mut by_label: std::collections::HashMap<String, Vec<TestItem>> = std::collections::HashMap::new();
        for item in items {
            if item.capability_label == META_LABEL {
                continue;
            }
            by_label.entry(item.capability_label.clone()).or_default().push(item);
        }

        let label_futures = by_label.into_iter().map(|(label, items)| async move {
            let agent_ids = self.router.select_many(&label).await;
            let work_items: Vec<WorkItem> = items
                .into_iter()
                .map(|item| WorkItem {
                    item_id: item.item_id,
                    task_description: item.description.clone(),
                    message_text: item.description,
                })
                .collect();

            let pool = WorkerPool::new(self.router.registry().clone(), Arc::clone(&self.dispatcher));
            pool.run(agent_ids, work_items, self.task_timeout).await
        });

        let per_label_results = futures::future::join_all(label_futures).await;
        let all_results: Vec<ItemResult> = per_label_results.into_iter().flatten().collect();

        let mut succeeded = 0;
        let mut failed_items = Vec::new();
        for result in &all_results {
            match result {
                ItemResult::Done(outcome) if outcome.remote_state == crate::models::RemoteTaskState::Completed => {
                    succeeded += 1;
                }
                ItemResult::Done(outcome) => failed_items.push((outcome.artifacts.clone(), outcome.task_record.error_message.clone().unwrap_or_default())),
                ItemResult::Error { message, .. } => failed_items.push((Vec::new(), message.clone())),
            }
        }

        let failed = failed_items.len();
        let incident_futures = failed_items.into_iter().map(|(artifacts, message)| async move {
            let files = artifacts
                .iter()
                .flat_map(|a: &Artifact| a.non_log_file_parts())
                .filter_map(|p| match p {
                    Part::File { name, mime_type, bytes } => Some(crate::agent_client::OutgoingFile {
                        name: name.clone(),
                        mime_type: mime_type.clone(),
                        bytes_base64: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
                    }),
                    Part::Text { .. } => None,
                })
                .collect();

            let description = format!("create incident for failed test execution: {message}");
            self.dispatcher.dispatch(description.clone(), description, files, self.task_timeout).await
        });

        let incident_results = futures::future::join_all(incident_futures).await;
        let incidents_created = incident_results.iter().filter(|r| r.is_ok()).count();
        for err in incident_results.iter().filter_map(|r| r.as_ref().err()) {
            warn!("incident creation dispatch failed: {}", err);
        }

        Ok(ExecuteTestsResult {
            succeeded,
            failed,
            incidents_created,
        })
    }
}
