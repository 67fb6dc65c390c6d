//! Chrome DevTools Protocol session using chromiumoxide.
//!
//! Connects to a Chrome/Chromium instance running with remote debugging
//! enabled (`google-chrome --remote-debugging-port=9222`). The connection is
//! established lazily on the first action; `close()` tears the page down and
//! is a no-op on subsequent calls.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{BrowserError, BrowserObservation, BrowserSession, PageContent};

/// Character cap for text extractions fed back to the planner.
const MAX_SUMMARY_CHARS: usize = 16_000;

/// Delay before the single in-adapter retry of a transient failure.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Settle time after navigation and clicks, matching typical page scripts.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

struct SessionInner {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

/// CDP-backed browser session for one task.
pub struct CdpSession {
    cdp_url: String,
    action_timeout: Duration,
    strict_locators: bool,
    inner: Mutex<Option<SessionInner>>,
}

impl CdpSession {
    pub fn new(cdp_url: String, action_timeout: Duration, strict_locators: bool) -> Self {
        Self {
            cdp_url,
            action_timeout,
            strict_locators,
            inner: Mutex::new(None),
        }
    }

    /// Connect to Chrome and open a blank page if not already connected.
    async fn ensure_connected(&self) -> Result<Page, BrowserError> {
        let mut guard = self.inner.lock().await;

        if guard.is_none() {
            let (browser, mut handler) = Browser::connect(&self.cdp_url).await.map_err(|e| {
                BrowserError::Session(format!(
                    "Failed to connect to Chrome at {}: {}",
                    self.cdp_url, e
                ))
            })?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        tracing::warn!("Browser event error: {}", e);
                    }
                }
            });

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| BrowserError::Session(format!("Failed to open page: {}", e)))?;

            tracing::debug!("Browser session established at {}", self.cdp_url);
            *guard = Some(SessionInner {
                browser,
                page,
                handler,
            });
        }

        match guard.as_ref() {
            Some(s) => Ok(s.page.clone()),
            None => Err(BrowserError::Session("session not initialized".to_string())),
        }
    }

    /// Bound an action future by the per-action deadline.
    async fn deadline<T, F>(&self, action: &str, fut: F) -> Result<T, BrowserError>
    where
        F: std::future::Future<Output = Result<T, BrowserError>>,
    {
        match tokio::time::timeout(self.action_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::ActionTimeout {
                action: action.to_string(),
                timeout_ms: self.action_timeout.as_millis() as u64,
            }),
        }
    }

    /// Resolve a locator, enforcing the ambiguity policy.
    ///
    /// Zero matches is an error. Multiple matches resolve to the first in
    /// document order with a warning, unless strict locators are configured.
    async fn resolve_element(
        &self,
        page: &Page,
        selector: &str,
    ) -> Result<chromiumoxide::element::Element, BrowserError> {
        let count_script = format!(
            "document.querySelectorAll({}).length",
            serde_json::to_string(selector).unwrap_or_default()
        );
        // An evaluate failure means the session is broken, not that the
        // element is missing; it must not be retried as transient.
        let count: u64 = page
            .evaluate(count_script.as_str())
            .await
            .map_err(|e| BrowserError::Session(format!("Selector evaluation failed: {}", e)))?
            .into_value()
            .map_err(|e| BrowserError::Session(format!("Selector evaluation failed: {}", e)))?;

        if count == 0 {
            return Err(BrowserError::ElementNotFound(format!(
                "no element matches selector '{}'",
                selector
            )));
        }
        if count > 1 {
            if self.strict_locators {
                return Err(BrowserError::ElementNotFound(format!(
                    "selector '{}' is ambiguous ({} matches, strict locators enabled)",
                    selector, count
                )));
            }
            tracing::warn!(
                "Selector '{}' matched {} elements, using the first",
                selector,
                count
            );
        }

        page.find_element(selector).await.map_err(|e| {
            BrowserError::ElementNotFound(format!("element '{}' not found: {}", selector, e))
        })
    }

    /// Observation of the current page with a caller-supplied summary.
    async fn observe(&self, page: &Page, summary: String) -> Result<BrowserObservation, BrowserError> {
        let url = page
            .url()
            .await
            .map_err(|e| BrowserError::Session(format!("Failed to read URL: {}", e)))?
            .unwrap_or_default();
        let title = page.get_title().await.unwrap_or(None);
        Ok(BrowserObservation::new(url, title, summary))
    }

    async fn try_navigate(&self, url: &str) -> Result<BrowserObservation, BrowserError> {
        let page = self.ensure_connected().await?;

        page.goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(format!("Failed to open {}: {}", url, e)))?;
        page.wait_for_navigation().await.ok();
        tokio::time::sleep(SETTLE_DELAY).await;

        let title = page.get_title().await.unwrap_or(None);
        let summary = format!(
            "Navigated to {} (title: {})",
            url,
            title.as_deref().unwrap_or("none")
        );
        self.observe(&page, summary).await
    }

    async fn try_click(&self, selector: &str) -> Result<BrowserObservation, BrowserError> {
        let page = self.ensure_connected().await?;
        let element = self.resolve_element(&page, selector).await?;

        element
            .click()
            .await
            .map_err(|e| BrowserError::Session(format!("Click on '{}' failed: {}", selector, e)))?;
        tokio::time::sleep(SETTLE_DELAY).await;

        self.observe(&page, format!("Clicked element: {}", selector))
            .await
    }

    async fn try_type_text(
        &self,
        selector: &str,
        text: &str,
        clear_first: bool,
    ) -> Result<BrowserObservation, BrowserError> {
        let page = self.ensure_connected().await?;
        let element = self.resolve_element(&page, selector).await?;

        element.click().await.map_err(|e| {
            BrowserError::Session(format!("Focus on '{}' failed: {}", selector, e))
        })?;

        if clear_first {
            page.evaluate("if (document.activeElement) document.activeElement.value = ''")
                .await
                .ok();
        }

        element.type_str(text).await.map_err(|e| {
            BrowserError::Session(format!("Typing into '{}' failed: {}", selector, e))
        })?;

        self.observe(&page, format!("Typed text into: {}", selector))
            .await
    }

    async fn try_press_keys(&self, keys: &str) -> Result<BrowserObservation, BrowserError> {
        let page = self.ensure_connected().await?;

        // Prefer the focused element; fall back to the document body.
        let element = match page.find_element(":focus").await {
            Ok(el) => el,
            Err(_) => page.find_element("body").await.map_err(|e| {
                BrowserError::ElementNotFound(format!("no focusable element: {}", e))
            })?,
        };

        element
            .press_key(keys)
            .await
            .map_err(|e| BrowserError::Session(format!("Key press '{}' failed: {}", keys, e)))?;
        tokio::time::sleep(SETTLE_DELAY).await;

        self.observe(&page, format!("Pressed keys: {}", keys)).await
    }

    async fn try_read_page(&self, content: PageContent) -> Result<BrowserObservation, BrowserError> {
        let page = self.ensure_connected().await?;

        let summary = match content {
            PageContent::TextOnly => {
                let result = page
                    .evaluate("document.body ? document.body.innerText : ''")
                    .await
                    .map_err(|e| BrowserError::Session(format!("Text extraction failed: {}", e)))?;
                let text: String = result.into_value().unwrap_or_default();
                truncate(&text)
            }
            PageContent::InputFields => {
                element_listing(&page, "input, textarea, select, button").await?
            }
            PageContent::AllFields => {
                element_listing(
                    &page,
                    "a, button, input, select, textarea, [onclick], [role='button']",
                )
                .await?
            }
        };

        self.observe(&page, summary).await
    }

    /// Run an action with at most one internal retry for transient failures.
    async fn with_retry<F, Fut>(
        &self,
        action: &str,
        run: F,
    ) -> Result<BrowserObservation, BrowserError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<BrowserObservation, BrowserError>>,
    {
        match self.deadline(action, run()).await {
            Ok(obs) => Ok(obs),
            Err(e) if e.is_transient() => {
                tracing::debug!("Action '{}' failed transiently ({}), retrying once", action, e);
                tokio::time::sleep(RETRY_DELAY).await;
                self.deadline(action, run()).await
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn navigate(&self, url: &str) -> Result<BrowserObservation, BrowserError> {
        self.with_retry("navigate", || self.try_navigate(url)).await
    }

    async fn click(&self, selector: &str) -> Result<BrowserObservation, BrowserError> {
        self.with_retry("click", || self.try_click(selector)).await
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        clear_first: bool,
    ) -> Result<BrowserObservation, BrowserError> {
        self.with_retry("type_text", || self.try_type_text(selector, text, clear_first))
            .await
    }

    async fn press_keys(&self, keys: &str) -> Result<BrowserObservation, BrowserError> {
        self.with_retry("press_keys", || self.try_press_keys(keys))
            .await
    }

    async fn read_page(&self, content: PageContent) -> Result<BrowserObservation, BrowserError> {
        self.with_retry("read_page", || self.try_read_page(content))
            .await
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let page = self.ensure_connected().await?;
        Ok(page
            .url()
            .await
            .map_err(|e| BrowserError::Session(format!("Failed to read URL: {}", e)))?
            .unwrap_or_default())
    }

    async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(session) = guard.take() {
            session.page.close().await.ok();
            session.handler.abort();
            drop(session.browser);
            tracing::debug!("Browser session released");
        }
    }
}

/// Truncate long text extractions, keeping the prefix.
fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_SUMMARY_CHARS {
        let prefix: String = text.chars().take(MAX_SUMMARY_CHARS).collect();
        format!(
            "{}\n... [truncated, {} total characters]",
            prefix,
            text.chars().count()
        )
    } else {
        text.to_string()
    }
}

/// Produce a numbered listing of elements matching a selector group.
async fn element_listing(page: &Page, selector: &str) -> Result<String, BrowserError> {
    let script = format!(
        r#"
        (() => {{
            const elements = document.querySelectorAll({sel});
            const results = [];
            for (let i = 0; i < Math.min(elements.length, 100); i++) {{
                const el = elements[i];
                const rect = el.getBoundingClientRect();
                results.push({{
                    tag: el.tagName.toLowerCase(),
                    id: el.id || null,
                    name: el.name || null,
                    type: el.type || null,
                    text: (el.innerText || el.value || el.placeholder || '').slice(0, 100).trim(),
                    href: el.href || null,
                    visible: rect.width > 0 && rect.height > 0
                }});
            }}
            return results;
        }})()
        "#,
        sel = serde_json::to_string(selector).unwrap_or_default()
    );

    let result = page
        .evaluate(script.as_str())
        .await
        .map_err(|e| BrowserError::Session(format!("Element listing failed: {}", e)))?;
    let elements: Vec<serde_json::Value> = result.into_value().unwrap_or_default();

    if elements.is_empty() {
        return Ok(format!("No elements found matching: {}", selector));
    }

    let mut output = format!("Found {} elements:\n", elements.len());
    for (i, el) in elements.iter().enumerate() {
        let tag = el["tag"].as_str().unwrap_or("?");
        let id = el["id"].as_str().filter(|s| !s.is_empty());
        let text = el["text"].as_str().filter(|s| !s.is_empty());
        let href = el["href"].as_str().filter(|s| !s.is_empty());
        let visible = el["visible"].as_bool().unwrap_or(true);

        let selector_hint = match id {
            Some(id) => format!("#{}", id),
            None => tag.to_string(),
        };

        output.push_str(&format!(
            "{}. [{}] {}",
            i + 1,
            if visible { "visible" } else { "hidden" },
            selector_hint
        ));
        if let Some(t) = text {
            output.push_str(&format!(" - \"{}\"", t.chars().take(60).collect::<String>()));
        }
        if let Some(h) = href {
            output.push_str(&format!(" -> {}", h.chars().take(60).collect::<String>()));
        }
        output.push('\n');
    }

    Ok(output)
}
