//! End-to-end tests of the task execution loop with scripted collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use webagent::browser::{BrowserError, BrowserObservation, BrowserSession, PageContent};
use webagent::planner::{ActionProposal, Decision, Planner, PlannerError};
use webagent::runner::{RunPolicy, TaskRunner};
use webagent::task::{FailureKind, TaskStatus, Turn, TurnAction, TurnOutcome};
use webagent::tools::{ToolErrorKind, ToolExecutor, ToolRegistry};

/// Planner that replays a scripted sequence of decisions.
struct ScriptedPlanner {
    steps: tokio::sync::Mutex<VecDeque<Result<Decision, PlannerError>>>,
    calls: AtomicUsize,
    /// When set, cancelled right after the first decision is handed out.
    cancel_after_first: Option<CancellationToken>,
}

impl ScriptedPlanner {
    fn new(steps: Vec<Result<Decision, PlannerError>>) -> Self {
        Self {
            steps: tokio::sync::Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            cancel_after_first: None,
        }
    }

    fn cancelling_after_first(steps: Vec<Result<Decision, PlannerError>>, token: CancellationToken) -> Self {
        Self {
            cancel_after_first: Some(token),
            ..Self::new(steps)
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn propose(
        &self,
        _command: &str,
        _history: &[Turn],
        _observation: Option<&BrowserObservation>,
    ) -> Result<Decision, PlannerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
        }
        self.steps
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(PlannerError::Unavailable("script exhausted".to_string())))
    }
}

/// Planner that never answers within any reasonable deadline.
struct StalledPlanner;

#[async_trait]
impl Planner for StalledPlanner {
    async fn propose(
        &self,
        _command: &str,
        _history: &[Turn],
        _observation: Option<&BrowserObservation>,
    ) -> Result<Decision, PlannerError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(Decision::Finish("too late".to_string()))
    }
}

/// Browser session stub that records actions and release calls.
#[derive(Default)]
struct ScriptedSession {
    actions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedSession {
    fn action_count(&self) -> usize {
        self.actions.load(Ordering::SeqCst)
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn max_concurrent_actions(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn record(&self, summary: &str) -> Result<BrowserObservation, BrowserError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Give a hypothetical overlapping action a chance to show up.
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.actions.fetch_add(1, Ordering::SeqCst);
        Ok(BrowserObservation::new(
            "https://example.com/",
            Some("Example Domain".to_string()),
            summary,
        ))
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&self, url: &str) -> Result<BrowserObservation, BrowserError> {
        self.record(&format!("Navigated to {}", url)).await
    }

    async fn click(&self, selector: &str) -> Result<BrowserObservation, BrowserError> {
        self.record(&format!("Clicked element: {}", selector)).await
    }

    async fn type_text(
        &self,
        selector: &str,
        _text: &str,
        _clear_first: bool,
    ) -> Result<BrowserObservation, BrowserError> {
        self.record(&format!("Typed text into: {}", selector)).await
    }

    async fn press_keys(&self, keys: &str) -> Result<BrowserObservation, BrowserError> {
        self.record(&format!("Pressed keys: {}", keys)).await
    }

    async fn read_page(&self, _content: PageContent) -> Result<BrowserObservation, BrowserError> {
        self.record("Example Domain").await
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.actions.fetch_add(1, Ordering::SeqCst);
        Ok("https://example.com/".to_string())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn open_url_action(url: &str) -> Decision {
    Decision::Act(ActionProposal {
        tool_name: "openurl".to_string(),
        params: serde_json::json!({"url": url}),
    })
}

fn get_url_action() -> Decision {
    Decision::Act(ActionProposal {
        tool_name: "geturl".to_string(),
        params: serde_json::json!({}),
    })
}

fn runner_with(planner: Arc<dyn Planner>, policy: RunPolicy) -> TaskRunner {
    let registry = Arc::new(ToolRegistry::with_builtin_tools());
    let executor = Arc::new(ToolExecutor::new(registry));
    TaskRunner::new(planner, executor, policy)
}

fn fast_policy() -> RunPolicy {
    RunPolicy {
        max_turns: 10,
        deadline: Duration::from_secs(10),
        planner_failure_limit: 3,
        planner_backoff: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn navigate_and_report_title_completes_in_two_turns() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        Ok(open_url_action("https://example.com")),
        Ok(Decision::Finish("Example Domain".to_string())),
    ]));
    let session = Arc::new(ScriptedSession::default());
    let runner = runner_with(planner.clone(), fast_policy());

    let report = runner
        .run(
            "navigate to https://example.com and report the page title",
            session.clone(),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(report.status, TaskStatus::Succeeded);
    assert_eq!(report.answer.as_deref(), Some("Example Domain"));
    assert_eq!(report.turns.len(), 2);
    assert!(matches!(report.turns[1].action, TurnAction::FinalAnswer { .. }));
    assert_eq!(planner.call_count(), 2);
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn turn_indices_are_strictly_increasing_without_gaps() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        Ok(open_url_action("https://example.com")),
        // A planner mistake: tool that does not exist.
        Ok(Decision::Act(ActionProposal {
            tool_name: "teleport".to_string(),
            params: serde_json::json!({}),
        })),
        // Another mistake: bad parameters.
        Ok(Decision::Act(ActionProposal {
            tool_name: "click".to_string(),
            params: serde_json::json!({"wrong_field": 1}),
        })),
        Ok(get_url_action()),
        Ok(Decision::Finish("done".to_string())),
    ]));
    let session = Arc::new(ScriptedSession::default());
    let runner = runner_with(planner, fast_policy());

    let report = runner
        .run("exercise failures", session, CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskStatus::Succeeded);
    assert_eq!(report.turns.len(), 5);
    for (i, turn) in report.turns.iter().enumerate() {
        assert_eq!(turn.index, i);
    }
}

#[tokio::test]
async fn actions_are_dispatched_sequentially() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        Ok(open_url_action("https://example.com")),
        Ok(get_url_action()),
        Ok(open_url_action("https://example.com/about")),
        Ok(Decision::Finish("done".to_string())),
    ]));
    let session = Arc::new(ScriptedSession::default());
    let runner = runner_with(planner, fast_policy());

    let report = runner
        .run("several steps", session.clone(), CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskStatus::Succeeded);
    assert_eq!(session.max_concurrent_actions(), 1);
}

#[tokio::test]
async fn final_answer_stops_the_loop() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        Ok(Decision::Finish("immediate".to_string())),
        // Would be another action, must never be requested.
        Ok(get_url_action()),
    ]));
    let session = Arc::new(ScriptedSession::default());
    let runner = runner_with(planner.clone(), fast_policy());

    let report = runner
        .run("answer right away", session.clone(), CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskStatus::Succeeded);
    assert_eq!(report.answer.as_deref(), Some("immediate"));
    assert_eq!(report.turns.len(), 1);
    assert_eq!(planner.call_count(), 1);
    assert_eq!(session.action_count(), 0);
}

#[tokio::test]
async fn turn_budget_exhaustion_fails_the_task_and_releases_the_session() {
    let steps: Vec<_> = (0..10).map(|_| Ok(get_url_action())).collect();
    let planner = Arc::new(ScriptedPlanner::new(steps));
    let session = Arc::new(ScriptedSession::default());
    let policy = RunPolicy {
        max_turns: 3,
        ..fast_policy()
    };
    let runner = runner_with(planner, policy);

    let report = runner
        .run("never finishes", session.clone(), CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskStatus::Failed);
    let failure = report.failure.expect("failure details");
    assert_eq!(failure.kind, FailureKind::BudgetExceeded);
    assert_eq!(report.turns.len(), 3);
    assert!(report.answer.is_none());
    assert_eq!(session.close_count(), 1);

    // Releasing again is a no-op and never errors.
    session.close().await;
    assert_eq!(session.close_count(), 2);
}

#[tokio::test]
async fn deadline_exhaustion_fails_the_task_and_releases_the_session() {
    let session = Arc::new(ScriptedSession::default());
    let policy = RunPolicy {
        deadline: Duration::from_millis(50),
        ..fast_policy()
    };
    let runner = runner_with(Arc::new(StalledPlanner), policy);

    let report = runner
        .run("slow oracle", session.clone(), CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskStatus::Failed);
    let failure = report.failure.expect("failure details");
    assert_eq!(failure.kind, FailureKind::BudgetExceeded);
    assert!(report.turns.is_empty());
    assert!(report.answer.is_none());
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn unknown_tool_is_fed_back_without_touching_the_browser() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        Ok(Decision::Act(ActionProposal {
            tool_name: "does_not_exist".to_string(),
            params: serde_json::json!({}),
        })),
        Ok(Decision::Finish("recovered".to_string())),
    ]));
    let session = Arc::new(ScriptedSession::default());
    let runner = runner_with(planner, fast_policy());

    let report = runner
        .run("propose a bad tool", session.clone(), CancellationToken::new())
        .await;

    // The planner mistake did not fail the task; it became an observation.
    assert_eq!(report.status, TaskStatus::Succeeded);
    assert_eq!(report.turns.len(), 2);
    match &report.turns[0].outcome {
        TurnOutcome::Error { kind, message } => {
            assert_eq!(*kind, ToolErrorKind::UnknownTool);
            assert!(message.contains("does_not_exist"));
        }
        other => panic!("expected an error outcome, got {:?}", other),
    }
    assert_eq!(session.action_count(), 0);
}

#[tokio::test]
async fn cancellation_aborts_between_turns() {
    let cancel = CancellationToken::new();
    let planner = Arc::new(ScriptedPlanner::cancelling_after_first(
        vec![
            Ok(get_url_action()),
            // Must never be requested: the token is cancelled before turn 2.
            Ok(get_url_action()),
        ],
        cancel.clone(),
    ));
    let session = Arc::new(ScriptedSession::default());
    let runner = runner_with(planner.clone(), fast_policy());

    let report = runner.run("long task", session.clone(), cancel).await;

    assert_eq!(report.status, TaskStatus::Aborted);
    assert!(report.answer.is_none());
    let failure = report.failure.expect("failure details");
    assert_eq!(failure.kind, FailureKind::Aborted);
    // Turn 1 completed and stays in history for diagnostics; no turn 2.
    assert_eq!(report.turns.len(), 1);
    assert_eq!(planner.call_count(), 1);
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn repeated_planner_failures_fail_the_task() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        Err(PlannerError::Unavailable("oracle down".to_string())),
        Err(PlannerError::Unavailable("oracle down".to_string())),
        Err(PlannerError::Unavailable("oracle down".to_string())),
    ]));
    let session = Arc::new(ScriptedSession::default());
    let runner = runner_with(planner.clone(), fast_policy());

    let report = runner
        .run("oracle outage", session.clone(), CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskStatus::Failed);
    let failure = report.failure.expect("failure details");
    assert_eq!(failure.kind, FailureKind::PlannerUnavailable);
    assert!(report.turns.is_empty());
    assert_eq!(planner.call_count(), 3);
    assert_eq!(session.close_count(), 1);
}

#[tokio::test]
async fn single_planner_failure_is_retried() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        Err(PlannerError::Unavailable("blip".to_string())),
        Ok(Decision::Finish("recovered".to_string())),
    ]));
    let session = Arc::new(ScriptedSession::default());
    let runner = runner_with(planner.clone(), fast_policy());

    let report = runner
        .run("transient oracle failure", session, CancellationToken::new())
        .await;

    assert_eq!(report.status, TaskStatus::Succeeded);
    assert_eq!(report.answer.as_deref(), Some("recovered"));
    assert_eq!(planner.call_count(), 2);
}
