//! Tool system: the actions the planner may invoke.
//!
//! Tools are named, schema-validated operations backed by the task's browser
//! session. The registry is built once at startup and is read-only
//! thereafter; the executor validates every invocation against the registry
//! before anything touches the browser.

mod browser_tools;

pub use browser_tools::register_builtin_tools;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::browser::{BrowserObservation, BrowserSession};
use crate::llm::{FunctionDefinition, ToolDefinition};

/// Information about a tool for the listing endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Successful outcome of a tool invocation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutput {
    /// Human-readable result, fed back to the planner.
    pub output: String,
    /// Fresh page observation, when the tool touched the browser.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<BrowserObservation>,
}

impl ToolOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            observation: None,
        }
    }

    pub fn observed(output: impl Into<String>, observation: BrowserObservation) -> Self {
        Self {
            output: output.into(),
            observation: Some(observation),
        }
    }
}

/// Stable error kinds exposed by the executor.
///
/// Adapter-specific errors are normalized into these; callers never see the
/// underlying browser library's error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidParameters,
    NavigationError,
    ElementNotFound,
    ActionTimeout,
    ExecutionError,
}

impl ToolErrorKind {
    /// Planner mistakes the planner itself can correct by re-proposing.
    pub fn is_planner_mistake(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::UnknownTool | ToolErrorKind::InvalidParameters
        )
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ToolErrorKind::UnknownTool => "unknown_tool",
            ToolErrorKind::InvalidParameters => "invalid_parameters",
            ToolErrorKind::NavigationError => "navigation_error",
            ToolErrorKind::ElementNotFound => "element_not_found",
            ToolErrorKind::ActionTimeout => "action_timeout",
            ToolErrorKind::ExecutionError => "execution_error",
        };
        write!(f, "{}", name)
    }
}

/// Uniform error shape for every tool invocation.
#[derive(Debug, Clone, Error, serde::Serialize)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(
            ToolErrorKind::UnknownTool,
            format!("tool '{}' is not registered", name),
        )
    }

    pub fn invalid_parameters(fields: &[String]) -> Self {
        Self::new(
            ToolErrorKind::InvalidParameters,
            format!("invalid parameters: {}", fields.join(", ")),
        )
    }
}

impl From<crate::browser::BrowserError> for ToolError {
    fn from(e: crate::browser::BrowserError) -> Self {
        use crate::browser::BrowserError;
        let kind = match &e {
            BrowserError::Navigation(_) => ToolErrorKind::NavigationError,
            BrowserError::ElementNotFound(_) => ToolErrorKind::ElementNotFound,
            BrowserError::ActionTimeout { .. } => ToolErrorKind::ActionTimeout,
            BrowserError::Session(_) => ToolErrorKind::ExecutionError,
        };
        Self::new(kind, e.to_string())
    }
}

/// Uniform shape returned by every tool invocation.
pub type ExecutionResult = Result<ToolOutput, ToolError>;

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does, shown to the planner.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with validated arguments against the task's session.
    async fn run(&self, args: Value, session: &dyn BrowserSession) -> ExecutionResult;
}

/// Error raised when registering a tool under a name already in use.
#[derive(Debug, Clone, Error)]
#[error("tool '{0}' is already registered")]
pub struct DuplicateToolError(pub String);

/// Registry of available tools.
///
/// Initialized once at process start; read-only afterwards and safe for
/// concurrent lookup. `list()` preserves registration order.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Create a registry with all built-in browser tools.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        register_builtin_tools(&mut registry);
        tracing::info!("Tool registry initialized with {} tools", registry.len());
        registry
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), DuplicateToolError> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(DuplicateToolError(name));
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// List all tools in registration order.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool schemas in the LLM function-calling format.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates invocations against the registry and dispatches them.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a tool by name.
    ///
    /// Lookup and parameter validation happen before the session is touched;
    /// an unknown tool or malformed parameters never reach the browser.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        session: &dyn BrowserSession,
    ) -> ExecutionResult {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::unknown_tool(name))?;

        let offending = validate_params(&tool.parameters_schema(), &params);
        if !offending.is_empty() {
            return Err(ToolError::invalid_parameters(&offending));
        }

        tracing::debug!("Executing tool '{}'", name);
        tool.run(params, session).await
    }
}

/// Validate arguments against a JSON schema of the shape the tools declare
/// (`type: object` with `properties` and `required`).
///
/// Returns the list of offending fields: missing required parameters and
/// parameters whose value does not match the declared primitive type.
fn validate_params(schema: &Value, params: &Value) -> Vec<String> {
    let mut offending = Vec::new();

    let obj = match params.as_object() {
        Some(obj) => obj,
        None => {
            if params.is_null() {
                // Null stands in for "no arguments"; only valid when nothing is required.
                if let Some(required) = schema["required"].as_array() {
                    for field in required {
                        if let Some(name) = field.as_str() {
                            offending.push(format!("{} (missing)", name));
                        }
                    }
                }
                return offending;
            }
            offending.push("(arguments must be a JSON object)".to_string());
            return offending;
        }
    };

    if let Some(required) = schema["required"].as_array() {
        for field in required {
            if let Some(name) = field.as_str() {
                if !obj.contains_key(name) {
                    offending.push(format!("{} (missing)", name));
                }
            }
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (name, value) in obj {
            match properties.get(name) {
                None => offending.push(format!("{} (unexpected)", name)),
                Some(prop) => {
                    if let Some(expected) = prop["type"].as_str() {
                        if !type_matches(expected, value) {
                            offending.push(format!("{} (expected {})", name, expected));
                        }
                    }
                }
            }
        }
    }

    offending
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "echoes its input"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "count": {"type": "integer"}
                },
                "required": ["text"]
            })
        }

        async fn run(&self, args: Value, _session: &dyn BrowserSession) -> ExecutionResult {
            Ok(ToolOutput::text(args["text"].as_str().unwrap_or("").to_string()))
        }
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo { name: "echo" })).unwrap();
        let err = registry.register(Arc::new(Echo { name: "echo" })).unwrap_err();
        assert_eq!(err.0, "echo");
    }

    #[test]
    fn list_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo { name: "b" })).unwrap();
        registry.register(Arc::new(Echo { name: "a" })).unwrap();
        registry.register(Arc::new(Echo { name: "c" })).unwrap();

        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn get_unknown_tool_is_none() {
        let registry = ToolRegistry::new();
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn validation_reports_offending_fields() {
        let schema = json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "timeout": {"type": "integer"}
            },
            "required": ["url"]
        });

        let offending = validate_params(&schema, &json!({"timeout": "soon"}));
        assert_eq!(offending.len(), 2);
        assert!(offending.iter().any(|f| f.contains("url")));
        assert!(offending.iter().any(|f| f.contains("timeout")));

        assert!(validate_params(&schema, &json!({"url": "https://example.com"})).is_empty());
    }

    #[test]
    fn null_params_valid_when_nothing_required() {
        let schema = json!({"type": "object", "properties": {}, "required": []});
        assert!(validate_params(&schema, &Value::Null).is_empty());

        let strict = json!({"type": "object", "properties": {"x": {"type": "string"}}, "required": ["x"]});
        assert_eq!(validate_params(&strict, &Value::Null).len(), 1);
    }
}
