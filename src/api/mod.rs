//! HTTP surface: routing, shared state, and handlers.

pub mod types;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::browser::{BrowserSession, CdpSession};
use crate::config::Config;
use crate::llm::OpenRouterClient;
use crate::planner::LlmPlanner;
use crate::runner::{RunPolicy, TaskRunner};
use crate::task::TaskStatus;
use crate::tools::{ToolErrorKind, ToolExecutor, ToolRegistry};

use types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ToolRegistry>,
    pub executor: Arc<ToolExecutor>,
    pub runner: Arc<TaskRunner>,
}

impl AppState {
    /// Wire up the registry, planner, and runner from configuration.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ToolRegistry::with_builtin_tools());
        let executor = Arc::new(ToolExecutor::new(Arc::clone(&registry)));

        let llm = Arc::new(OpenRouterClient::new(config.api_key.clone()));
        let planner = Arc::new(LlmPlanner::new(
            llm,
            config.planner_model.clone(),
            registry.tool_definitions(),
            config.history_window,
        ));

        let policy = RunPolicy {
            max_turns: config.max_turns,
            deadline: config.task_deadline,
            planner_failure_limit: config.planner_failure_limit,
            ..RunPolicy::default()
        };
        let runner = Arc::new(TaskRunner::new(planner, Arc::clone(&executor), policy));

        Self {
            config,
            registry,
            executor,
            runner,
        }
    }

    /// A fresh browser session for one task. Never shared across tasks.
    fn new_session(&self) -> Arc<dyn BrowserSession> {
        Arc::new(CdpSession::new(
            self.config.cdp_url.clone(),
            self.config.action_timeout,
            self.config.strict_locators,
        ))
    }
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/execute_task", post(execute_task))
        .route("/list-tools", get(list_tools))
        .route("/call-tool", post(call_tool))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        planner_model: state.config.planner_model.clone(),
        max_turns: state.config.max_turns,
    })
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ListToolsResponse> {
    Json(ListToolsResponse {
        tools: state.registry.list(),
    })
}

/// Run a task end-to-end and hold the request open until it terminates.
///
/// If the caller disconnects, the drop guard cancels the task's token; the
/// loop aborts at the next turn boundary and releases its session.
async fn execute_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteTaskRequest>,
) -> (StatusCode, Json<ExecuteTaskResponse>) {
    let command = request.command.trim().to_string();
    if command.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ExecuteTaskResponse {
                task_id: uuid::Uuid::nil(),
                status: TaskStatus::Failed,
                answer: None,
                error: Some(ErrorBody {
                    kind: "invalid_request".to_string(),
                    message: "command must not be empty".to_string(),
                }),
                turns: 0,
            }),
        );
    }

    let session = state.new_session();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let runner = Arc::clone(&state.runner);
    let task = tokio::spawn(async move { runner.run(&command, session, cancel).await });

    let report = match task.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Task execution panicked: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExecuteTaskResponse {
                    task_id: uuid::Uuid::nil(),
                    status: TaskStatus::Failed,
                    answer: None,
                    error: Some(ErrorBody {
                        kind: "internal_error".to_string(),
                        message: "task execution failed unexpectedly".to_string(),
                    }),
                    turns: 0,
                }),
            );
        }
    };
    drop(guard);

    let status_code = match report.status {
        TaskStatus::Succeeded => StatusCode::OK,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status_code,
        Json(ExecuteTaskResponse {
            task_id: report.id.as_uuid(),
            status: report.status,
            answer: report.answer,
            error: report.failure.map(|f| ErrorBody {
                kind: f.kind.to_string(),
                message: f.message,
            }),
            turns: report.turns.len(),
        }),
    )
}

/// Invoke a single tool directly, bypassing the planning loop.
///
/// Used for diagnostics and manual tool testing. Registry and parameter
/// validation run before any browser session is touched; the session here is
/// lazy, so a rejected invocation never connects to the browser.
async fn call_tool(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CallToolRequest>,
) -> (StatusCode, Json<CallToolResponse>) {
    let session = state.new_session();

    let result = state
        .executor
        .execute(&request.tool_name, request.tool_params, session.as_ref())
        .await;

    session.close().await;

    match result {
        Ok(output) => (StatusCode::OK, Json(CallToolResponse::Ok { result: output })),
        Err(e) => {
            let status = match e.kind {
                ToolErrorKind::UnknownTool => StatusCode::NOT_FOUND,
                ToolErrorKind::InvalidParameters => StatusCode::UNPROCESSABLE_ENTITY,
                // The invocation itself was valid; the environment failed.
                _ => StatusCode::OK,
            };
            (status, Json(CallToolResponse::Error { error: e }))
        }
    }
}
