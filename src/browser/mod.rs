//! Browser session abstraction.
//!
//! The task loop and the tools never talk to a concrete automation library;
//! they depend on the [`BrowserSession`] trait. The CDP-backed implementation
//! lives in [`cdp`]; tests substitute scripted sessions.
//!
//! A session is owned by exactly one task for its lifetime. It is created
//! lazily on the first action and released (idempotently) when the task
//! reaches a terminal state.

mod cdp;

pub use cdp::CdpSession;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot of browser state after an action.
///
/// Produced fresh after every executed action; never mutated, only
/// superseded by the next observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserObservation {
    /// URL of the page after the action completed.
    pub url: String,
    /// Page title, if the page exposes one.
    pub title: Option<String>,
    /// Serialized summary of the page produced by the action (text content,
    /// element listing, or a short action confirmation).
    pub summary: String,
}

impl BrowserObservation {
    pub fn new(url: impl Into<String>, title: Option<String>, summary: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title,
            summary: summary.into(),
        }
    }
}

/// Which representation of the page content to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageContent {
    /// Inner text of the document. Most complete textual information.
    TextOnly,
    /// Text input and button elements only.
    InputFields,
    /// All interactive elements and their attributes.
    AllFields,
}

impl PageContent {
    /// Parse the wire name used by the `get_dom_with_content_type` tool.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "text_only" => Some(PageContent::TextOnly),
            "input_fields" => Some(PageContent::InputFields),
            "all_fields" => Some(PageContent::AllFields),
            _ => None,
        }
    }
}

/// Errors from browser actions.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    /// URL unreachable or invalid.
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// Locator resolved to zero elements (or was ambiguous under strict mode).
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The action exceeded its per-action deadline.
    #[error("Action '{action}' timed out after {timeout_ms} ms")]
    ActionTimeout { action: String, timeout_ms: u64 },

    /// Session-level failure (browser unreachable, page crashed).
    #[error("Browser session error: {0}")]
    Session(String),
}

impl BrowserError {
    /// Stable kind string, used when normalizing into tool results.
    pub fn kind(&self) -> &'static str {
        match self {
            BrowserError::Navigation(_) => "navigation_error",
            BrowserError::ElementNotFound(_) => "element_not_found",
            BrowserError::ActionTimeout { .. } => "action_timeout",
            BrowserError::Session(_) => "session_error",
        }
    }

    /// Whether a single in-adapter retry is worth attempting.
    ///
    /// Element lookups fail transiently while a page is still loading;
    /// invalid URLs do not get better on a second try.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrowserError::ElementNotFound(_) | BrowserError::ActionTimeout { .. }
        )
    }
}

/// A live browser context owned by a single task.
///
/// All actions return a fresh [`BrowserObservation`] on success. Each action
/// is bounded by a per-action deadline inside the implementation; callers
/// never block unboundedly.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate to a URL and wait for the page to load.
    async fn navigate(&self, url: &str) -> Result<BrowserObservation, BrowserError>;

    /// Click the element matching a CSS selector.
    async fn click(&self, selector: &str) -> Result<BrowserObservation, BrowserError>;

    /// Type text into the element matching a CSS selector.
    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        clear_first: bool,
    ) -> Result<BrowserObservation, BrowserError>;

    /// Press a key combination (e.g. "Enter", "Control+a") on the focused element.
    async fn press_keys(&self, keys: &str) -> Result<BrowserObservation, BrowserError>;

    /// Extract a representation of the current page.
    async fn read_page(&self, content: PageContent) -> Result<BrowserObservation, BrowserError>;

    /// URL of the current page.
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Release the underlying browser context.
    ///
    /// Must be idempotent: releasing an already-released session is a no-op
    /// and never errors.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lookup_failures_are_transient() {
        assert!(BrowserError::ElementNotFound("#x".to_string()).is_transient());
        assert!(BrowserError::ActionTimeout {
            action: "click".to_string(),
            timeout_ms: 100,
        }
        .is_transient());
        // A broken session does not get better on a second try.
        assert!(!BrowserError::Session("evaluate failed".to_string()).is_transient());
        assert!(!BrowserError::Navigation("bad url".to_string()).is_transient());
    }

    #[test]
    fn content_modes_parse_wire_names() {
        assert_eq!(PageContent::from_name("text_only"), Some(PageContent::TextOnly));
        assert_eq!(PageContent::from_name("all_fields"), Some(PageContent::AllFields));
        assert_eq!(PageContent::from_name("everything"), None);
    }
}
