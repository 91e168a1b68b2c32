//! HTTP API (northbound, §6): workflow endpoints, dashboard auth, and
//! dashboard read views, assembled behind the same layered-middleware
//! build as the teacher's router.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::auth::{auth_middleware, create_auth_state, dashboard_auth_middleware, AuthService, DashboardAuthState, LoginRequest};
use crate::config::{ApiConfig, Config};
use crate::dashboard::Dashboard;
use crate::validation::KeyValidator;
use crate::workflows::Workflows;
use crate::{OrchestratorError, Result};

const SERVICE_NAME: &str = "agent-orchestrator";
const SERVICE_VERSION: &str = "0.1.0";

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    workflows: Arc<Workflows>,
    dashboard: Dashboard,
    auth_service: AuthService,
    key_validator: Arc<KeyValidator>,
}

impl ApiServer {
    pub fn new(config: Config, workflows: Arc<Workflows>, dashboard: Dashboard) -> Result<Self> {
        Ok(Self {
            config: config.api,
            workflows,
            dashboard,
            auth_service: AuthService::new(config.dashboard_auth),
            key_validator: Arc::new(KeyValidator::new()?),
        })
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
            .await
            .map_err(|e| OrchestratorError::Internal(e.into()))?;

        info!("API server listening on {}:{}", self.config.host, self.config.port);

        axum::serve(listener, app.into_make_service())
            .await
            .map_err(|e| OrchestratorError::Internal(e.into()))?;

        Ok(())
    }

    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.clone());
        let dashboard_auth_state = Arc::new(DashboardAuthState {
            service: self.auth_service.clone(),
        });

        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
            ])
            .max_age(Duration::from_secs(3600));

        let workflow_routes = Router::new()
            .route("/review-requirements", post(review_requirements))
            .route("/generate-tests", post(generate_tests))
            .route("/execute-tests", post(execute_tests))
            .route("/update-index", post(update_index))
            .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

        let dashboard_routes = Router::new()
            .route("/dashboard/summary", get(dashboard_summary))
            .route("/dashboard/agents", get(dashboard_agents))
            .route("/dashboard/tasks", get(dashboard_tasks))
            .route("/dashboard/errors", get(dashboard_errors))
            .route("/dashboard/logs", get(dashboard_logs))
            .layer(middleware::from_fn_with_state(dashboard_auth_state, dashboard_auth_middleware));

        Router::new()
            .route("/health", get(health_check))
            .route("/auth/login", post(login))
            .merge(workflow_routes)
            .merge(dashboard_routes)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors_layer))
            .with_state(self.clone())
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": SERVICE_NAME, "version": SERVICE_VERSION}))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message.into() }))
}

async fn login(State(api): State<ApiServer>, Json(request): Json<LoginRequest>) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
    if !api.auth_service.authenticate(&request.username, &request.password) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let token = api.auth_service.create_token(&request.username).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::to_value(token).unwrap()))
}

#[derive(Debug, Deserialize)]
struct IssueKeyRequest {
    issue_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectKeyRequest {
    project_key: Option<String>,
}

async fn review_requirements(
    State(api): State<ApiServer>,
    Json(request): Json<IssueKeyRequest>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let issue_key = request.issue_key.ok_or_else(|| bad_request("missing issue_key"))?;
    api.key_validator.validate(&issue_key).map_err(to_api_error)?;
    let description = format!("Review the user story {issue_key}");
    let result = api.workflows.review(description).await.map_err(to_api_error)?;
    Ok(Json(json!({"issue_key": issue_key, "status": "completed", "review": result.text, "task_id": result.task_id})))
}

async fn generate_tests(
    State(api): State<ApiServer>,
    Json(request): Json<IssueKeyRequest>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let issue_key = request.issue_key.ok_or_else(|| bad_request("missing issue_key"))?;
    api.key_validator.validate(&issue_key).map_err(to_api_error)?;
    let prompt = format!("Generate tests for the user story {issue_key}");
    let result = api.workflows.generate_classify_review(prompt).await.map_err(to_api_error)?;
    Ok(Json(json!({"issue_key": issue_key, "status": "completed", "result": result})))
}

async fn execute_tests(
    State(api): State<ApiServer>,
    Json(request): Json<ProjectKeyRequest>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let project_key = request.project_key.ok_or_else(|| bad_request("missing project_key"))?;
    api.key_validator.validate(&project_key).map_err(to_api_error)?;
    let result = api.workflows.execute_tests().await.map_err(to_api_error)?;
    Ok(Json(json!({"project_key": project_key, "status": "completed", "result": result})))
}

async fn update_index(
    State(api): State<ApiServer>,
    Json(request): Json<ProjectKeyRequest>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let project_key = request.project_key.ok_or_else(|| bad_request("missing project_key"))?;
    api.key_validator.validate(&project_key).map_err(to_api_error)?;
    let description = format!("Sync the index for project {project_key}");
    let task_id = api.workflows.update_index(description).await.map_err(to_api_error)?;
    Ok(Json(json!({"project_key": project_key, "status": "completed", "task_id": task_id})))
}

fn to_api_error(e: OrchestratorError) -> (StatusCode, Json<ErrorBody>) {
    (e.status_code(), Json(ErrorBody { error: e.to_string() }))
}

async fn dashboard_summary(State(api): State<ApiServer>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(api.dashboard.get_summary().await).unwrap())
}

async fn dashboard_agents(State(api): State<ApiServer>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(api.dashboard.get_agents_status().await).unwrap())
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn dashboard_tasks(State(api): State<ApiServer>, Query(query): Query<LimitQuery>) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(50);
    Json(serde_json::to_value(api.dashboard.get_recent_tasks(limit).await).unwrap())
}

async fn dashboard_errors(State(api): State<ApiServer>, Query(query): Query<LimitQuery>) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(50);
    Json(serde_json::to_value(api.dashboard.get_recent_errors(limit).await).unwrap())
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
    level: Option<String>,
    task_id: Option<String>,
    agent_id: Option<String>,
}

async fn dashboard_logs(State(api): State<ApiServer>, Query(query): Query<LogsQuery>) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(200);
    if let Some(task_id) = query.task_id {
        let logs = api.dashboard.get_agent_logs_for_task(&task_id, query.level.as_deref()).await;
        return Json(serde_json::to_value(logs).unwrap());
    }
    if let Some(agent_id) = query.agent_id {
        let logs = api.dashboard.get_agent_logs_for_agent(&agent_id, query.level.as_deref()).await;
        return Json(serde_json::to_value(logs).unwrap());
    }
    let logs = api.dashboard.get_logs(limit, query.level.as_deref()).await;
    Json(serde_json::to_value(logs).unwrap())
}

#[cfg(test)]
mod tests;
