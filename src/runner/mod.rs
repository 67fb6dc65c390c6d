//! Task execution loop.
//!
//! Turns a natural-language command into a bounded sequence of tool
//! invocations against a live browser session, guided by the planner.
//!
//! # State machine
//! ```text
//! Initialized -> Planning -> Acting -> Observing -> (Planning | Succeeded | Failed | Aborted)
//! ```
//! - Executor errors do not abort the task; they are recorded as completed
//!   turns and fed back as the next observation so the planner can react.
//! - Only budget exhaustion, repeated planner unavailability, and external
//!   cancellation terminate the task without an answer.
//! - The browser session is released exactly once, on first entry to a
//!   terminal state, on every path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserObservation, BrowserSession};
use crate::planner::{Decision, Planner};
use crate::task::{FailureKind, TaskFailure, TaskId, TaskReport, TaskStatus, Turn, TurnAction, TurnOutcome};
use crate::tools::ToolExecutor;

/// Budgets and retry limits for one task.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Maximum total turn count, final-answer turn included.
    pub max_turns: usize,
    /// Wall-clock deadline for the whole task.
    pub deadline: Duration,
    /// Consecutive planner failures tolerated before the task fails.
    pub planner_failure_limit: u32,
    /// Base backoff between planner retries; grows linearly per failure.
    pub planner_backoff: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_turns: 20,
            deadline: Duration::from_secs(300),
            planner_failure_limit: 3,
            planner_backoff: Duration::from_secs(1),
        }
    }
}

enum Terminal {
    Succeeded(String),
    Failed(TaskFailure),
    Aborted,
}

/// Drives one task from command to terminal state.
///
/// Within a task, turns execute strictly one at a time; a second action is
/// never issued while one is outstanding. The runner itself is stateless
/// across tasks and may serve many tasks concurrently, each with its own
/// session.
pub struct TaskRunner {
    planner: Arc<dyn Planner>,
    executor: Arc<ToolExecutor>,
    policy: RunPolicy,
}

impl TaskRunner {
    pub fn new(planner: Arc<dyn Planner>, executor: Arc<ToolExecutor>, policy: RunPolicy) -> Self {
        Self {
            planner,
            executor,
            policy,
        }
    }

    /// Run a command to completion.
    ///
    /// `session` is owned by this task; it is created lazily by the adapter
    /// on first use and released here when the task terminates, however it
    /// terminates. `cancel` is checked between turns only.
    pub async fn run(
        &self,
        command: &str,
        session: Arc<dyn BrowserSession>,
        cancel: CancellationToken,
    ) -> TaskReport {
        let id = TaskId::new();
        let started_at = Utc::now();
        let start = Instant::now();

        tracing::info!(task = %id, "Task started: {}", truncate_command(command));

        let mut turns: Vec<Turn> = Vec::new();
        let mut observation: Option<BrowserObservation> = None;
        let mut planner_failures: u32 = 0;

        let terminal = loop {
            // Cancellation is cooperative and checked between turns.
            if cancel.is_cancelled() {
                break Terminal::Aborted;
            }

            if turns.len() >= self.policy.max_turns {
                break Terminal::Failed(TaskFailure::new(
                    FailureKind::BudgetExceeded,
                    format!("turn budget of {} exhausted", self.policy.max_turns),
                ));
            }

            let remaining = self.policy.deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break Terminal::Failed(TaskFailure::new(
                    FailureKind::BudgetExceeded,
                    format!("deadline of {:?} exceeded", self.policy.deadline),
                ));
            }

            // Planning: one outstanding oracle call, bounded by the time left.
            let decision = match tokio::time::timeout(
                remaining,
                self.planner.propose(command, &turns, observation.as_ref()),
            )
            .await
            {
                Err(_) => {
                    break Terminal::Failed(TaskFailure::new(
                        FailureKind::BudgetExceeded,
                        format!("deadline of {:?} exceeded while planning", self.policy.deadline),
                    ));
                }
                Ok(Err(e)) => {
                    planner_failures += 1;
                    tracing::warn!(
                        task = %id,
                        "Planner failure {}/{}: {}",
                        planner_failures,
                        self.policy.planner_failure_limit,
                        e
                    );
                    if planner_failures >= self.policy.planner_failure_limit {
                        break Terminal::Failed(TaskFailure::new(
                            FailureKind::PlannerUnavailable,
                            format!("planner failed {} consecutive times", planner_failures),
                        ));
                    }
                    tokio::time::sleep(self.policy.planner_backoff * planner_failures).await;
                    continue;
                }
                Ok(Ok(decision)) => decision,
            };
            planner_failures = 0;

            match decision {
                Decision::Finish(answer) => {
                    turns.push(Turn::new(
                        turns.len(),
                        TurnAction::FinalAnswer {
                            text: answer.clone(),
                        },
                        TurnOutcome::Success {
                            output: answer.clone(),
                        },
                    ));
                    break Terminal::Succeeded(answer);
                }
                Decision::Act(proposal) => {
                    tracing::debug!(
                        task = %id,
                        turn = turns.len(),
                        "Executing tool '{}'",
                        proposal.tool_name
                    );

                    // Acting -> Observing: success and error both complete the turn.
                    let outcome = match self
                        .executor
                        .execute(&proposal.tool_name, proposal.params.clone(), session.as_ref())
                        .await
                    {
                        Ok(output) => {
                            if let Some(obs) = &output.observation {
                                observation = Some(obs.clone());
                            }
                            TurnOutcome::Success {
                                output: output.output,
                            }
                        }
                        Err(e) => {
                            if e.kind.is_planner_mistake() {
                                tracing::warn!(
                                    task = %id,
                                    turn = turns.len(),
                                    "Planner mistake fed back: {}",
                                    e
                                );
                            } else {
                                tracing::debug!(
                                    task = %id,
                                    turn = turns.len(),
                                    "Tool error fed back as observation: {}",
                                    e
                                );
                            }
                            TurnOutcome::Error {
                                kind: e.kind,
                                message: e.message,
                            }
                        }
                    };

                    turns.push(Turn::new(
                        turns.len(),
                        TurnAction::Tool {
                            name: proposal.tool_name,
                            params: proposal.params,
                        },
                        outcome,
                    ));
                }
            }
        };

        // First entry to a terminal state releases the session. close() is
        // idempotent, so a second release elsewhere is harmless.
        session.close().await;

        let (status, answer, failure) = match terminal {
            Terminal::Succeeded(answer) => {
                tracing::info!(task = %id, turns = turns.len(), "Task succeeded");
                (TaskStatus::Succeeded, Some(answer), None)
            }
            Terminal::Failed(failure) => {
                tracing::warn!(task = %id, turns = turns.len(), "Task failed: {}", failure.message);
                (TaskStatus::Failed, None, Some(failure))
            }
            Terminal::Aborted => {
                tracing::info!(task = %id, turns = turns.len(), "Task aborted");
                (
                    TaskStatus::Aborted,
                    None,
                    Some(TaskFailure::new(
                        FailureKind::Aborted,
                        "task aborted by external cancellation",
                    )),
                )
            }
        };

        TaskReport {
            id,
            command: command.to_string(),
            status,
            answer,
            failure,
            turns,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

fn truncate_command(command: &str) -> String {
    command.chars().take(80).collect()
}
