//! Task data model: one end-to-end request and its turn history.
//!
//! A [`Turn`] is immutable once recorded. Turn indices are assigned by the
//! execution loop, strictly increasing from 0 with no gaps, regardless of
//! how many turns failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tools::ToolErrorKind;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task in its lifecycle.
///
/// ```text
/// Running -> Succeeded
///         \-> Failed
///         \-> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is being executed by the loop.
    Running,
    /// The planner produced a final answer.
    Succeeded,
    /// Budget exhausted or the planner became unavailable.
    Failed,
    /// External cancellation before a terminal answer.
    Aborted,
}

impl TaskStatus {
    /// Terminal states accept no further turns.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// The action the planner proposed on a turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnAction {
    /// A tool invocation.
    Tool {
        name: String,
        params: serde_json::Value,
    },
    /// The terminal answer; the loop executes no further turns after this.
    FinalAnswer { text: String },
}

/// Outcome of executing a turn's action.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TurnOutcome {
    Success { output: String },
    Error { kind: ToolErrorKind, message: String },
}

impl TurnOutcome {
    /// The text fed back to the planner as the next observation.
    pub fn as_feedback(&self) -> String {
        match self {
            TurnOutcome::Success { output } => output.clone(),
            TurnOutcome::Error { kind, message } => format!("Error ({}): {}", kind, message),
        }
    }
}

/// One planner decision and its outcome. Immutable once recorded.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    /// Position in the task history, starting at 0.
    pub index: usize,
    /// What the planner proposed.
    pub action: TurnAction,
    /// What happened when it was executed.
    pub outcome: TurnOutcome,
    /// When the turn completed.
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(index: usize, action: TurnAction, outcome: TurnOutcome) -> Self {
        Self {
            index,
            action,
            outcome,
            at: Utc::now(),
        }
    }
}

/// Why a task terminated without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Turn or wall-clock budget exhausted.
    BudgetExceeded,
    /// The planning oracle failed repeatedly.
    PlannerUnavailable,
    /// External cancellation.
    Aborted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::BudgetExceeded => write!(f, "budget_exceeded"),
            FailureKind::PlannerUnavailable => write!(f, "planner_unavailable"),
            FailureKind::Aborted => write!(f, "aborted"),
        }
    }
}

/// Terminal failure with a short human-readable reason.
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Final result of running one task through the execution loop.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    /// The original natural-language command.
    pub command: String,
    pub status: TaskStatus,
    /// The planner's final answer, present iff the task succeeded.
    pub answer: Option<String>,
    /// Failure details, present iff the task failed or was aborted.
    pub failure: Option<TaskFailure>,
    /// Completed turns, in order. Kept on every path for diagnostics.
    pub turns: Vec<Turn>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Aborted.is_terminal());
    }

    #[test]
    fn turns_serialize_with_tagged_action_and_outcome() {
        let turn = Turn::new(
            0,
            TurnAction::Tool {
                name: "click".to_string(),
                params: serde_json::json!({"selector": "#go"}),
            },
            TurnOutcome::Error {
                kind: ToolErrorKind::ElementNotFound,
                message: "no element matches selector '#go'".to_string(),
            },
        );

        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["action"]["type"], "tool");
        assert_eq!(value["outcome"]["result"], "error");
        assert_eq!(value["outcome"]["kind"], "element_not_found");
    }

    #[test]
    fn outcome_feedback_includes_error_kind() {
        let outcome = TurnOutcome::Error {
            kind: ToolErrorKind::UnknownTool,
            message: "tool 'x' is not registered".to_string(),
        };
        let feedback = outcome.as_feedback();
        assert!(feedback.contains("unknown_tool"));
        assert!(feedback.contains("not registered"));
    }
}
