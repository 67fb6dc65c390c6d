//! Planner client: the adapter to the planning oracle.
//!
//! The oracle is stateless; every call receives the full bounded context
//! (command, recent turns, current observation) and returns exactly one of
//! two shapes: a tool invocation to try next, or the final answer. Anything
//! else is rejected at this boundary.
//!
//! The planner is treated as unreliable by design: it may name a tool that
//! does not exist or send malformed parameters. Those are not errors here;
//! the execution loop feeds them back so the oracle can correct itself.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::browser::BrowserObservation;
use crate::llm::{ChatMessage, LlmClient, Role, ToolDefinition};
use crate::task::{Turn, TurnAction};

/// A tool invocation proposed by the planner.
#[derive(Debug, Clone)]
pub struct ActionProposal {
    pub tool_name: String,
    pub params: serde_json::Value,
}

/// What the planner wants to do next.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Invoke a tool and observe the result.
    Act(ActionProposal),
    /// The task is done; this is the answer.
    Finish(String),
}

/// Transport or protocol failure talking to the oracle.
#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    #[error("Planner unavailable: {0}")]
    Unavailable(String),
}

/// Trait for planner implementations.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Propose the next step for a task.
    ///
    /// `history` is the ordered turn sequence so far; implementations
    /// truncate it to their own context window, oldest first.
    async fn propose(
        &self,
        command: &str,
        history: &[Turn],
        observation: Option<&BrowserObservation>,
    ) -> Result<Decision, PlannerError>;
}

const SYSTEM_PROMPT: &str = "\
You are an autonomous web task executor. You complete the user's task by \
driving a web browser through the provided tools.

## Rules
1. Use the tools to act on the browser - do not describe what you would do.
2. Inspect the page (get_dom_with_content_type) before interacting with elements.
3. The DOM representation is ordered the way items appear on the page; keep \
this in mind for requests mentioning ordinals or numbered items.
4. If a tool call fails, read the error and adjust your next step.
5. When the task is complete, reply with the final answer as plain text and \
no tool call. Keep the answer short and factual.";

/// LLM-backed planner.
///
/// Holds no conversation state; the message list is rebuilt from the turn
/// history on every call.
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    model: String,
    tools: Vec<ToolDefinition>,
    /// Maximum number of most-recent turns included in the context.
    history_window: usize,
}

impl LlmPlanner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: String,
        tools: Vec<ToolDefinition>,
        history_window: usize,
    ) -> Self {
        Self {
            llm,
            model,
            tools,
            history_window,
        }
    }

    /// Rebuild the bounded message context for one oracle call.
    fn build_messages(
        &self,
        command: &str,
        history: &[Turn],
        observation: Option<&BrowserObservation>,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::new(Role::System, SYSTEM_PROMPT),
            ChatMessage::new(Role::User, command),
        ];

        // Oldest turns are dropped first to bound request size.
        let start = history.len().saturating_sub(self.history_window);
        if start > 0 {
            messages.push(ChatMessage::new(
                Role::User,
                format!("[{} earlier turns omitted]", start),
            ));
        }

        for turn in &history[start..] {
            if let TurnAction::Tool { name, params } = &turn.action {
                let call_id = format!("turn-{}", turn.index);
                messages.push(ChatMessage {
                    role: Role::Assistant,
                    content: None,
                    tool_calls: Some(vec![crate::llm::ToolCall {
                        id: call_id.clone(),
                        call_type: "function".to_string(),
                        function: crate::llm::FunctionCall {
                            name: name.clone(),
                            arguments: params.to_string(),
                        },
                    }]),
                    tool_call_id: None,
                });
                messages.push(ChatMessage::tool_result(call_id, turn.outcome.as_feedback()));
            }
        }

        if let Some(obs) = observation {
            messages.push(ChatMessage::new(
                Role::User,
                format!(
                    "Current page: {} (title: {})",
                    obs.url,
                    obs.title.as_deref().unwrap_or("none")
                ),
            ));
        }

        messages
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn propose(
        &self,
        command: &str,
        history: &[Turn],
        observation: Option<&BrowserObservation>,
    ) -> Result<Decision, PlannerError> {
        let messages = self.build_messages(command, history, observation);

        let response = self
            .llm
            .chat_completion(&self.model, &messages, Some(&self.tools))
            .await
            .map_err(|e| PlannerError::Unavailable(e.to_string()))?;

        if let Some(tool_calls) = response.tool_calls {
            if let Some(call) = tool_calls.first() {
                if tool_calls.len() > 1 {
                    tracing::warn!(
                        "Oracle proposed {} tool calls, executing only the first ('{}')",
                        tool_calls.len(),
                        call.function.name
                    );
                }
                // Unparseable arguments become null params; the executor
                // rejects them and the feedback lets the oracle correct itself.
                let params = if call.function.arguments.trim().is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
                        tracing::warn!(
                            "Oracle sent unparseable arguments for '{}': {}",
                            call.function.name,
                            e
                        );
                        serde_json::Value::Null
                    })
                };
                return Ok(Decision::Act(ActionProposal {
                    tool_name: call.function.name.clone(),
                    params,
                }));
            }
        }

        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(Decision::Finish(text.trim().to_string())),
            _ => Err(PlannerError::Unavailable(
                "oracle returned neither a tool call nor an answer".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, FunctionCall, LlmError, ToolCall};
    use crate::task::TurnOutcome;
    use tokio::sync::Mutex;

    /// LlmClient stub returning queued responses.
    struct StubLlm {
        responses: Mutex<Vec<Result<ChatResponse, LlmError>>>,
        seen_messages: Mutex<Vec<usize>>,
    }

    impl StubLlm {
        fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
        ) -> Result<ChatResponse, LlmError> {
            self.seen_messages.lock().await.push(messages.len());
            self.responses.lock().await.remove(0)
        }
    }

    fn tool_call_response(name: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call-0".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
            finish_reason: Some("tool_calls".to_string()),
            usage: None,
            model: None,
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            content: Some(text.to_string()),
            tool_calls: None,
            finish_reason: Some("stop".to_string()),
            usage: None,
            model: None,
        }
    }

    fn planner_with(responses: Vec<Result<ChatResponse, LlmError>>) -> LlmPlanner {
        LlmPlanner::new(
            Arc::new(StubLlm::new(responses)),
            "test-model".to_string(),
            Vec::new(),
            10,
        )
    }

    #[tokio::test]
    async fn tool_call_becomes_action_proposal() {
        let planner = planner_with(vec![Ok(tool_call_response(
            "openurl",
            r#"{"url": "https://example.com"}"#,
        ))]);

        let decision = planner.propose("go to example.com", &[], None).await.unwrap();
        match decision {
            Decision::Act(proposal) => {
                assert_eq!(proposal.tool_name, "openurl");
                assert_eq!(proposal.params["url"], "https://example.com");
            }
            Decision::Finish(_) => panic!("expected an action"),
        }
    }

    #[tokio::test]
    async fn plain_content_becomes_final_answer() {
        let planner = planner_with(vec![Ok(text_response("Example Domain"))]);

        let decision = planner.propose("report the title", &[], None).await.unwrap();
        match decision {
            Decision::Finish(answer) => assert_eq!(answer, "Example Domain"),
            Decision::Act(_) => panic!("expected a final answer"),
        }
    }

    #[tokio::test]
    async fn unparseable_arguments_become_null_params() {
        let planner = planner_with(vec![Ok(tool_call_response("click", "{not json"))]);

        let decision = planner.propose("click it", &[], None).await.unwrap();
        match decision {
            Decision::Act(proposal) => assert!(proposal.params.is_null()),
            Decision::Finish(_) => panic!("expected an action"),
        }
    }

    #[tokio::test]
    async fn empty_response_is_unavailable() {
        let planner = planner_with(vec![Ok(ChatResponse {
            content: None,
            tool_calls: None,
            finish_reason: None,
            usage: None,
            model: None,
        })]);

        let err = planner.propose("do a thing", &[], None).await.unwrap_err();
        assert!(matches!(err, PlannerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_unavailable() {
        let planner = planner_with(vec![Err(LlmError::network_error("refused".to_string()))]);

        let err = planner.propose("do a thing", &[], None).await.unwrap_err();
        assert!(matches!(err, PlannerError::Unavailable(_)));
    }

    #[test]
    fn history_window_drops_oldest_turns() {
        let planner = planner_with(vec![]);
        let history: Vec<Turn> = (0..20)
            .map(|i| {
                Turn::new(
                    i,
                    TurnAction::Tool {
                        name: "geturl".to_string(),
                        params: serde_json::Value::Null,
                    },
                    TurnOutcome::Success {
                        output: format!("turn {}", i),
                    },
                )
            })
            .collect();

        let messages = planner.build_messages("task", &history, None);
        // system + user + omission marker + 10 turns * 2 messages
        assert_eq!(messages.len(), 3 + 10 * 2);
        let feedback: Vec<_> = messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .collect();
        assert!(feedback.iter().any(|c| c.contains("turn 19")));
        assert!(!feedback.iter().any(|c| c.contains("turn 9\n") || *c == "turn 9"));
        assert!(feedback.iter().any(|c| c.contains("10 earlier turns omitted")));
    }
}
