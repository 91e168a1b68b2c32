use std::sync::Arc;
use std::time::Duration;

use agent_orchestrator::agent_client::AgentClient;
use agent_orchestrator::api::ApiServer;
use agent_orchestrator::config::Config;
use agent_orchestrator::constants::{DEFAULT_ERROR_HISTORY_CAPACITY, DEFAULT_LOG_HISTORY_CAPACITY, DEFAULT_TASK_HISTORY_CAPACITY};
use agent_orchestrator::dashboard::Dashboard;
use agent_orchestrator::dispatcher::Dispatcher;
use agent_orchestrator::discovery::{Discovery, DiscoveryConfig};
use agent_orchestrator::history::{ErrorHistory, LogHistory, TaskHistory};
use agent_orchestrator::logging::MemoryLogLayer;
use agent_orchestrator::recovery::RecoveryLoop;
use agent_orchestrator::registry::AgentRegistry;
use agent_orchestrator::router::{RoundRobinOracle, Router};
use agent_orchestrator::test_management::HttpTestManagementAdapter;
use agent_orchestrator::workflows::Workflows;
use anyhow::Result;
use tracing::info;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let log_history = LogHistory::new(DEFAULT_LOG_HISTORY_CAPACITY);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .with(MemoryLogLayer::new(log_history.clone()))
        .init();

    info!("starting agent orchestrator");

    let config = Config::load()?;

    let registry = AgentRegistry::new();
    let client = AgentClient::new();
    let task_history = TaskHistory::new(DEFAULT_TASK_HISTORY_CAPACITY);
    let error_history = ErrorHistory::new(DEFAULT_ERROR_HISTORY_CAPACITY);

    let router = Arc::new(Router::new(registry.clone(), Arc::new(RoundRobinOracle)));

    let (recovery_loop, recovery_sender) = RecoveryLoop::new(registry.clone(), client.clone());
    recovery_loop.start().await;

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        Arc::clone(&router),
        client.clone(),
        task_history.clone(),
        error_history.clone(),
        recovery_sender,
    ));

    let discovery = Discovery::new(
        DiscoveryConfig {
            base_hosts: config.discovery.remote_agent_hosts.clone(),
            port_start: config.discovery.discovery_port_start,
            port_end: config.discovery.discovery_port_end,
            interval: Duration::from_secs(config.discovery.discovery_interval_secs),
        },
        registry.clone(),
        client.clone(),
    );
    discovery.start().await;

    let test_adapter = Arc::new(HttpTestManagementAdapter::new(
        config.test_management.base_url.clone(),
        config.test_management.api_key.clone(),
    ));
    let task_timeout = Duration::from_secs(config.discovery.task_execution_timeout_secs);
    let workflows = Arc::new(Workflows::new(Arc::clone(&dispatcher), Arc::clone(&router), test_adapter, task_timeout));

    let dashboard = Dashboard::new(registry.clone(), task_history.clone(), error_history.clone(), log_history.clone());

    let api_server = ApiServer::new(config, workflows, dashboard)?;

    let shutdown_result = api_server.run().await;

    discovery.shutdown().await;
    recovery_loop.shutdown().await;

    if let Err(e) = shutdown_result {
        tracing::error!("API server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
