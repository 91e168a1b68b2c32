use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::constants::{DEFAULT_DISCOVERY_INTERVAL_SECS, DEFAULT_TASK_EXECUTION_TIMEOUT_SECS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub discovery: DiscoveryConfig,
    pub dashboard_auth: DashboardAuthConfig,
    pub test_management: TestManagementConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Base URLs of agent hosts, e.g. `http://127.0.0.1`.
    pub remote_agent_hosts: Vec<String>,
    /// Inclusive port range to scan per host.
    pub discovery_port_start: u16,
    pub discovery_port_end: u16,
    pub discovery_interval_secs: u64,
    pub task_execution_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardAuthConfig {
    pub jwt_secret: String,
    pub username: String,
    pub password: String,
    pub jwt_expire_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestManagementConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("no .env file loaded: {}", e),
        }

        let api_key = env::var("ORCHESTRATOR_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("ORCHESTRATOR_API_KEY not set; workflow endpoints are unauthenticated");
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env::var("ORCHESTRATOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("ORCHESTRATOR_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| OrchestratorError::Config("ORCHESTRATOR_PORT must be a valid port number".to_string()))?,
            api_key,
            allowed_origins,
        };

        let remote_agent_hosts = env::var("REMOTE_AGENT_HOSTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let port_range = env::var("AGENT_DISCOVERY_PORTS").unwrap_or_else(|_| "9000-9010".to_string());
        let (discovery_port_start, discovery_port_end) = parse_port_range(&port_range)?;

        let discovery = DiscoveryConfig {
            remote_agent_hosts,
            discovery_port_start,
            discovery_port_end,
            discovery_interval_secs: env::var("DISCOVERY_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DISCOVERY_INTERVAL_SECS),
            task_execution_timeout_secs: env::var("TASK_EXECUTION_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TASK_EXECUTION_TIMEOUT_SECS),
        };

        let jwt_secret = env::var("DASHBOARD_JWT_SECRET").unwrap_or_else(|_| {
            tracing::error!("DASHBOARD_JWT_SECRET not set; generating an ephemeral secret");
            tracing::error!("set DASHBOARD_JWT_SECRET to a stable secure value: openssl rand -hex 32");
            uuid::Uuid::new_v4().to_string()
        });

        let dashboard_auth = DashboardAuthConfig {
            jwt_secret,
            username: env::var("DASHBOARD_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            password: env::var("DASHBOARD_PASSWORD").unwrap_or_else(|_| "admin".to_string()),
            jwt_expire_hours: crate::constants::DEFAULT_JWT_EXPIRE_HOURS,
        };

        let test_management = TestManagementConfig {
            base_url: env::var("TEST_MANAGEMENT_BASE_URL").ok().filter(|v| !v.is_empty()),
            api_key: env::var("TEST_MANAGEMENT_API_KEY").ok().filter(|v| !v.is_empty()),
        };

        Ok(Config {
            api,
            discovery,
            dashboard_auth,
            test_management,
        })
    }
}

fn parse_port_range(raw: &str) -> Result<(u16, u16)> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| OrchestratorError::Config(format!("invalid AGENT_DISCOVERY_PORTS '{raw}', expected 'start-end'")))?;
    let start: u16 = start
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::Config(format!("invalid AGENT_DISCOVERY_PORTS start '{start}'")))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::Config(format!("invalid AGENT_DISCOVERY_PORTS end '{end}'")))?;
    if start > end {
        return Err(OrchestratorError::Config(format!(
            "AGENT_DISCOVERY_PORTS start {start} must be <= end {end}"
        )));
    }
    Ok((start, end))
}
