//! Default `TestManagementAdapter` (§1, §4.8, §6 `AdapterFailure`).
//!
//! The adapter implementation itself is an external collaborator and
//! out of scope; what the core needs is one narrow HTTP client that
//! turns a configured backend's item list into `TestItem`s. Grounded
//! on `agent_client.rs`'s reqwest idiom: a bare `reqwest::Client`, a
//! deserialize target, and errors folded into one adapter-level kind.

use serde::Deserialize;

use crate::workflows::{TestItem, TestManagementAdapter};
use crate::{OrchestratorError, Result};

#[derive(Debug, Clone, Deserialize)]
struct RemoteTestItem {
    item_id: String,
    capability_label: String,
    description: String,
}

/// Fetches the work-item list from a configured test-management
/// backend's `GET /items` endpoint. Configured entirely off the
/// `TEST_MANAGEMENT_BASE_URL` / `TEST_MANAGEMENT_API_KEY` environment
/// variables; with no base URL set, `list_items` returns an empty list
/// rather than failing, so `execute-tests` degrades to a no-op instead
/// of blocking startup on an optional collaborator.
pub struct HttpTestManagementAdapter {
    http: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl HttpTestManagementAdapter {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl TestManagementAdapter for HttpTestManagementAdapter {
    async fn list_items(&self) -> Result<Vec<TestItem>> {
        let Some(base_url) = &self.base_url else {
            return Ok(Vec::new());
        };

        let mut request = self.http.get(format!("{base_url}/items"));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| OrchestratorError::AdapterFailure { message: e.to_string() })?;
        if !response.status().is_success() {
            return Err(OrchestratorError::AdapterFailure {
                message: format!("test-management backend returned {}", response.status()),
            });
        }

        let items: Vec<RemoteTestItem> = response
            .json()
            .await
            .map_err(|e| OrchestratorError::AdapterFailure { message: e.to_string() })?;

        Ok(items
            .into_iter()
            .map(|i| TestItem {
                item_id: i.item_id,
                capability_label: i.capability_label,
                description: i.description,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_adapter_returns_no_items() {
        let adapter = HttpTestManagementAdapter::new(None, None);
        let items = adapter.list_items().await.unwrap();
        assert!(items.is_empty());
    }
}
