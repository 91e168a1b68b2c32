//! Worker-pool scheduler for bulk, capability-matched execution (§4.7).
//! One worker task per agent in a label's pool, draining a shared FIFO
//! queue; failures re-queue at the tail for a surviving worker to pick
//! up, or synthesise an error result if no worker survives.
//!
//! Grounded on `agents/orchestrator/task_queue.rs`'s queue shape, with
//! its `Vec::push`/`Vec::pop` LIFO bug corrected to `VecDeque`
//! `push_back`/`pop_front` for genuine FIFO, matching the tail-requeue
//! requirement below.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::WORKER_BUSY_POLL_INTERVAL_MS;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::models::AgentStatus;
use crate::registry::AgentRegistry;

/// One unit of work handed to a worker: carries enough to build a
/// dispatch (a task description) plus caller-supplied identity used
/// to label the result.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub item_id: String,
    pub task_description: String,
    pub message_text: String,
}

/// A completed or synthesised result for one work item.
#[derive(Debug, Clone)]
pub enum ItemResult {
    Done(DispatchOutcome),
    Error {
        item_id: String,
        agent_name: String,
        message: String,
    },
}

struct SharedQueue {
    items: Mutex<VecDeque<WorkItem>>,
    live_workers: AtomicUsize,
}

/// Drives one label's pool to completion: queue drains and every
/// worker exits (§4.7 step 5).
pub struct WorkerPool {
    registry: AgentRegistry,
    dispatcher: Arc<Dispatcher>,
}

impl WorkerPool {
    pub fn new(registry: AgentRegistry, dispatcher: Arc<Dispatcher>) -> Self {
        Self { registry, dispatcher }
    }

    pub async fn run(&self, agent_ids: Vec<String>, items: Vec<WorkItem>, overall_timeout: Duration) -> Vec<ItemResult> {
        if agent_ids.is_empty() {
            return items
                .into_iter()
                .map(|item| ItemResult::Error {
                    item_id: item.item_id,
                    agent_name: "none".to_string(),
                    message: "no agents available for this capability label".to_string(),
                })
                .collect();
        }

        let shared = Arc::new(SharedQueue {
            items: Mutex::new(VecDeque::from(items)),
            live_workers: AtomicUsize::new(agent_ids.len()),
        });
        let results: Arc<Mutex<Vec<ItemResult>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            let shared = Arc::clone(&shared);
            let results = Arc::clone(&results);
            let registry = self.registry.clone();
            let dispatcher = Arc::clone(&self.dispatcher);

            handles.push(tokio::spawn(async move {
                run_worker(agent_id, registry, dispatcher, shared, results, overall_timeout).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker task panicked: {}", e);
            }
        }

        Arc::try_unwrap(results).map(|m| m.into_inner()).unwrap_or_default()
    }
}

/// One worker's loop (§4.7 step 3-4).
async fn run_worker(
    agent_id: String,
    registry: AgentRegistry,
    dispatcher: Arc<Dispatcher>,
    shared: Arc<SharedQueue>,
    results: Arc<Mutex<Vec<ItemResult>>>,
    overall_timeout: Duration,
) {
    loop {
        let status = registry.get_status(&agent_id).await;
        if status == AgentStatus::Broken {
            break;
        }
        if status == AgentStatus::Busy {
            tokio::time::sleep(Duration::from_millis(WORKER_BUSY_POLL_INTERVAL_MS)).await;
            continue;
        }

        let item = {
            let mut queue = shared.items.lock().await;
            queue.pop_front()
        };
        let Some(item) = item else {
            break; // queue drained
        };

        debug!("worker {} taking item {}", agent_id, item.item_id);
        let outcome = dispatcher
            .dispatch(item.task_description.clone(), item.message_text.clone(), Vec::new(), overall_timeout)
            .await;

        match outcome {
            Ok(done) => {
                results.lock().await.push(ItemResult::Done(done));
            }
            Err(e) => {
                let still_others_alive = shared.live_workers.load(Ordering::SeqCst) > 1;
                if still_others_alive {
                    // §4.7 step 4: requeue at the tail, let a survivor pick it up.
                    shared.items.lock().await.push_back(item);
                    break;
                } else {
                    let agent_name = registry.get_name(&agent_id).await;
                    results.lock().await.push(ItemResult::Error {
                        item_id: item.item_id,
                        agent_name,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    shared.live_workers.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_pool_synthesises_errors_for_every_item() {
        let registry = AgentRegistry::new();
        let http_client = crate::agent_client::AgentClient::new();
        let task_history = crate::history::TaskHistory::new(10);
        let error_history = crate::history::ErrorHistory::new(10);
        let (recovery_loop, recovery_tx) = crate::recovery::RecoveryLoop::new(registry.clone(), http_client.clone());
        let _ = recovery_loop; // not started; no background task needed for this test
        let router = Arc::new(crate::router::Router::new(registry.clone(), Arc::new(crate::router::RoundRobinOracle)));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), router, http_client, task_history, error_history, recovery_tx));

        let pool = WorkerPool::new(registry, dispatcher);
        let items = vec![WorkItem {
            item_id: "i1".to_string(),
            task_description: "run test".to_string(),
            message_text: "run test".to_string(),
        }];
        let results = pool.run(vec![], items, Duration::from_secs(1)).await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], ItemResult::Error { .. }));
    }
}
