//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::TaskStatus;
use crate::tools::{ToolError, ToolInfo, ToolOutput};

/// Request to execute a natural-language task.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteTaskRequest {
    /// The natural-language command to carry out
    pub command: String,
}

/// Error details exposed to callers: a stable kind and a short reason,
/// never internal stack detail.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Response for a completed (or terminally failed) task.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    /// Present iff the task succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Present iff the task failed or was aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Number of turns executed
    pub turns: usize,
}

/// Response for the tool listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ListToolsResponse {
    pub tools: Vec<ToolInfo>,
}

/// Request to invoke a single tool directly, bypassing the planning loop.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_params: serde_json::Value,
}

/// Result of a direct tool invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CallToolResponse {
    Ok { result: ToolOutput },
    Error { error: ToolError },
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub planner_model: String,
    pub max_turns: usize,
}
