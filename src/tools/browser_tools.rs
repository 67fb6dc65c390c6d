//! Built-in browser tools.
//!
//! Each tool translates validated arguments into one browser action and
//! formats the resulting observation for the planner.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ExecutionResult, Tool, ToolError, ToolErrorKind, ToolOutput, ToolRegistry};
use crate::browser::{BrowserSession, PageContent};

/// Register every built-in tool, in the order they are advertised.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(OpenUrl),
        Arc::new(GetDomWithContentType),
        Arc::new(Click),
        Arc::new(GetUrl),
        Arc::new(EnterText),
        Arc::new(BulkEnterText),
        Arc::new(PressKeyCombination),
    ];
    for tool in tools {
        if let Err(e) = registry.register(tool) {
            // Built-in names are distinct; a duplicate here is a programming error.
            tracing::error!("Skipping built-in tool: {}", e);
        }
    }
}

fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args[field].as_str().ok_or_else(|| {
        ToolError::new(
            ToolErrorKind::InvalidParameters,
            format!("invalid parameters: {} (missing)", field),
        )
    })
}

/// Opens a URL in the task's browser session.
pub struct OpenUrl;

#[async_trait]
impl Tool for OpenUrl {
    fn name(&self) -> &str {
        "openurl"
    }

    fn description(&self) -> &str {
        "Opens a specified URL in the web browser instance. Returns the URL of the new page if successful or an appropriate error message if the page could not be opened."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to navigate to. Value must include the protocol (http:// or https://)."
                },
                "timeout": {
                    "type": "integer",
                    "description": "Additional wait time in seconds after initial load."
                }
            },
            "required": ["url"]
        })
    }

    async fn run(&self, args: Value, session: &dyn BrowserSession) -> ExecutionResult {
        let url = require_str(&args, "url")?;
        let url = parse_url(url)?;

        let observation = session.navigate(url.as_str()).await?;
        Ok(ToolOutput::observed(
            observation.summary.clone(),
            observation,
        ))
    }
}

/// Prefix bare hostnames with https and reject malformed URLs before the
/// browser sees them.
fn parse_url(raw: &str) -> Result<url::Url, ToolError> {
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };
    url::Url::parse(&candidate).map_err(|e| {
        ToolError::new(
            ToolErrorKind::NavigationError,
            format!("Navigation failed: invalid URL '{}': {}", raw, e),
        )
    })
}

/// Extracts the DOM of the current page in one of three representations.
pub struct GetDomWithContentType;

#[async_trait]
impl Tool for GetDomWithContentType {
    fn name(&self) -> &str {
        "get_dom_with_content_type"
    }

    fn description(&self) -> &str {
        "Retrieves the DOM of the current web site based on the given content type. \
         text_only - plain text of the page, use for information retrieval. \
         input_fields - JSON list of text input elements, use for interacting with text inputs. \
         all_fields - JSON list of all interactive elements. \
         If information is not available in one content type, try another."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content_type": {
                    "type": "string",
                    "description": "The type of content to extract: 'text_only', 'input_fields' or 'all_fields'."
                }
            },
            "required": ["content_type"]
        })
    }

    async fn run(&self, args: Value, session: &dyn BrowserSession) -> ExecutionResult {
        let name = require_str(&args, "content_type")?;
        let content = PageContent::from_name(name).ok_or_else(|| {
            ToolError::new(
                ToolErrorKind::InvalidParameters,
                format!(
                    "invalid parameters: content_type (expected one of text_only, input_fields, all_fields, got '{}')",
                    name
                ),
            )
        })?;

        let observation = session.read_page(content).await?;
        Ok(ToolOutput::observed(
            observation.summary.clone(),
            observation,
        ))
    }
}

/// Clicks the element matching a query selector.
pub struct Click;

#[async_trait]
impl Tool for Click {
    fn name(&self) -> &str {
        "click"
    }

    fn description(&self) -> &str {
        "Executes a click action on the element matching the given query selector. Returns success or an appropriate error message if the element could not be clicked."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "selector": {
                    "type": "string",
                    "description": "The properly formed query selector string to identify the element for the click action."
                }
            },
            "required": ["selector"]
        })
    }

    async fn run(&self, args: Value, session: &dyn BrowserSession) -> ExecutionResult {
        let selector = require_str(&args, "selector")?;
        let observation = session.click(selector).await?;
        Ok(ToolOutput::observed(
            observation.summary.clone(),
            observation,
        ))
    }
}

/// Returns the URL of the current page.
pub struct GetUrl;

#[async_trait]
impl Tool for GetUrl {
    fn name(&self) -> &str {
        "geturl"
    }

    fn description(&self) -> &str {
        "Get the full URL of the current web page/site. Use this when the user command implies an action on an already open website."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn run(&self, _args: Value, session: &dyn BrowserSession) -> ExecutionResult {
        let url = session.current_url().await?;
        Ok(ToolOutput::text(format!("Current URL: {}", url)))
    }
}

/// Enters text into a single DOM element.
pub struct EnterText;

#[async_trait]
impl Tool for EnterText {
    fn name(&self) -> &str {
        "entertext"
    }

    fn description(&self) -> &str {
        "Enters the given text in the DOM element matching the given query selector. This only enters the text and does not press enter or anything else. Returns success or an appropriate error message."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entry": {
                    "type": "object",
                    "description": "Object containing 'query_selector' and 'text'.",
                    "properties": {
                        "query_selector": {"type": "string"},
                        "text": {"type": "string"}
                    },
                    "required": ["query_selector", "text"]
                }
            },
            "required": ["entry"]
        })
    }

    async fn run(&self, args: Value, session: &dyn BrowserSession) -> ExecutionResult {
        let entry = &args["entry"];
        let selector = entry["query_selector"].as_str().ok_or_else(|| {
            ToolError::new(
                ToolErrorKind::InvalidParameters,
                "invalid parameters: entry.query_selector (missing)",
            )
        })?;
        let text = entry["text"].as_str().ok_or_else(|| {
            ToolError::new(
                ToolErrorKind::InvalidParameters,
                "invalid parameters: entry.text (missing)",
            )
        })?;

        let observation = session.type_text(selector, text, true).await?;
        Ok(ToolOutput::observed(
            observation.summary.clone(),
            observation,
        ))
    }
}

/// Enters text into multiple DOM elements in one call.
pub struct BulkEnterText;

#[async_trait]
impl Tool for BulkEnterText {
    fn name(&self) -> &str {
        "bulk_enter_text"
    }

    fn description(&self) -> &str {
        "Bulk enter text in multiple DOM fields on the same page. Receives a list of objects containing the DOM query selector and the text to enter. Returns each selector and the result of attempting to enter text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entries": {
                    "type": "array",
                    "description": "List of objects, each containing 'query_selector' and 'text'.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "query_selector": {"type": "string"},
                            "text": {"type": "string"}
                        },
                        "required": ["query_selector", "text"]
                    }
                }
            },
            "required": ["entries"]
        })
    }

    async fn run(&self, args: Value, session: &dyn BrowserSession) -> ExecutionResult {
        let entries = args["entries"].as_array().ok_or_else(|| {
            ToolError::new(
                ToolErrorKind::InvalidParameters,
                "invalid parameters: entries (missing)",
            )
        })?;

        let mut results = Vec::new();
        let mut last_observation = None;
        for (i, entry) in entries.iter().enumerate() {
            // Malformed entries never reach the browser; defaulting the text
            // would clear the field and report a bogus success.
            let selector = match entry["query_selector"].as_str() {
                Some(s) if !s.is_empty() => s,
                _ => {
                    results.push(format!("entry {}: error (missing query_selector)", i));
                    continue;
                }
            };
            let text = match entry["text"].as_str() {
                Some(t) => t,
                None => {
                    results.push(format!("{}: error (missing text)", selector));
                    continue;
                }
            };
            match session.type_text(selector, text, true).await {
                Ok(observation) => {
                    results.push(format!("{}: success", selector));
                    last_observation = Some(observation);
                }
                Err(e) => results.push(format!("{}: {}", selector, e)),
            }
        }

        let output = results.join("\n");
        Ok(match last_observation {
            Some(observation) => ToolOutput::observed(output, observation),
            None => ToolOutput::text(output),
        })
    }
}

/// Presses a key combination on the focused element.
pub struct PressKeyCombination;

#[async_trait]
impl Tool for PressKeyCombination {
    fn name(&self) -> &str {
        "press_key_combination"
    }

    fn description(&self) -> &str {
        "Presses the given key combination in the browser (e.g. 'Enter' to submit a focused form field). Use after entering text when the page expects a key press."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key_combination": {
                    "type": "string",
                    "description": "The key or key combination to press, e.g. 'Enter' or 'Control+a'."
                }
            },
            "required": ["key_combination"]
        })
    }

    async fn run(&self, args: Value, session: &dyn BrowserSession) -> ExecutionResult {
        let keys = require_str(&args, "key_combination")?;
        let observation = session.press_keys(keys).await?;
        Ok(ToolOutput::observed(
            observation.summary.clone(),
            observation,
        ))
    }
}
