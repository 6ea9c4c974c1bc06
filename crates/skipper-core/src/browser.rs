use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One open tab, as shown to the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TabInfo {
    pub url: String,
    pub title: String,
}

/// Transient view of the browser, recomputed for every step. Never persisted.
#[derive(Clone, Debug, Default)]
pub struct BrowserStateSnapshot {
    /// URL of the active tab, empty when no tab is visible.
    pub url: String,
    /// Title of the active tab, empty when no tab is visible.
    pub title: String,
    /// All open tabs in enumeration order.
    pub tabs: Vec<TabInfo>,
    /// Index into `tabs` of the active tab; `None` when no tab reports
    /// visible.
    pub active_tab: Option<usize>,
    /// Sanitized textual content of the active page.
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("timed out after {timeout:?}: {context}")]
    Timeout { timeout: Duration, context: String },

    #[error("no such tab: {index}")]
    NoSuchTab { index: usize },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// The browser-control collaborator.
///
/// One implementation drives a real Chrome over CDP; tests substitute stubs.
/// All tab indices are zero-based positions in the driver's enumeration
/// order (prompt rendering converts to one-based).
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Compute a fresh snapshot of the browser state. Missing or invisible
    /// tabs degrade to the empty snapshot rather than failing.
    async fn snapshot(&self) -> Result<BrowserStateSnapshot, BrowserError>;

    /// Navigate the active tab, waiting (bounded) for the content to load.
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn go_back(&self) -> Result<(), BrowserError>;

    async fn reload(&self) -> Result<(), BrowserError>;

    /// Wait (bounded) for a selector to match on the active page.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    async fn press_key(&self, key: &str) -> Result<(), BrowserError>;

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<(), BrowserError>;

    /// Extract the sanitized textual content of the active page.
    async fn extract_text(&self) -> Result<String, BrowserError>;

    /// Open a new blank tab.
    async fn open_tab(&self) -> Result<(), BrowserError>;

    async fn close_tab(&self, index: usize) -> Result<(), BrowserError>;

    async fn switch_tab(&self, index: usize) -> Result<(), BrowserError>;

    /// Open a fresh, otherwise-inert tab displaying the given text. Used to
    /// leave the run transcript visible when the browser is kept open.
    async fn show_text_page(&self, text: &str) -> Result<(), BrowserError>;

    /// Release the browser resource.
    async fn close(&self) -> Result<(), BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_fully_degraded() {
        let snap = BrowserStateSnapshot::default();
        assert!(snap.url.is_empty());
        assert!(snap.tabs.is_empty());
        assert!(snap.active_tab.is_none());
        assert!(snap.content.is_empty());
    }

    #[test]
    fn tab_info_serde_roundtrip() {
        let tab = TabInfo {
            url: "https://example.com".into(),
            title: "Example".into(),
        };
        let json = serde_json::to_string(&tab).unwrap();
        let parsed: TabInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tab);
    }

    #[test]
    fn error_display() {
        let err = BrowserError::Timeout {
            timeout: Duration::from_millis(5000),
            context: "waiting for #login".into(),
        };
        assert!(err.to_string().contains("#login"));

        let err = BrowserError::NoSuchTab { index: 4 };
        assert!(err.to_string().contains('4'));
    }
}
