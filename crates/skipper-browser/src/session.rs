//! `ChromeBrowser` — the multi-tab `BrowserDriver` over flat-session CDP.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use skipper_core::browser::{BrowserDriver, BrowserError, BrowserStateSnapshot, TabInfo};

use crate::cdp::CdpConnection;
use crate::chrome;
use crate::sanitize;

const NAV_TIMEOUT: Duration = Duration::from_secs(15);
const ELEMENT_TIMEOUT: Duration = Duration::from_secs(5);
const READY_POLL: Duration = Duration::from_millis(100);

/// One attached page target.
#[derive(Clone, Debug)]
struct TabHandle {
    target_id: String,
    session_id: String,
}

/// Chrome session owning the launched process and every attached tab.
///
/// Tabs are kept in creation/discovery order; the "current page" is never
/// stored but resolved per operation by scanning tabs for the first one
/// whose visibility check reports `visible` (enumeration order breaks ties).
pub struct ChromeBrowser {
    cdp: CdpConnection,
    tabs: RwLock<Vec<TabHandle>>,
    process: Mutex<Option<Child>>,
}

impl ChromeBrowser {
    /// Launch a headless Chrome and attach to its initial tab.
    pub async fn launch() -> Result<Self, BrowserError> {
        let chrome_path = chrome::find_chrome().ok_or_else(|| {
            BrowserError::Launch("Chrome not found — install it or set CHROME_PATH".into())
        })?;

        let port = free_port()?;
        let child = Command::new(&chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg(format!("--remote-debugging-port={port}"))
            .arg("--window-size=1280,800")
            .arg("about:blank")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let ws_url = wait_for_browser_ws(port).await?;
        let cdp = CdpConnection::connect(&ws_url).await?;

        let browser = Self {
            cdp,
            tabs: RwLock::new(Vec::new()),
            process: Mutex::new(Some(child)),
        };

        browser.refresh_tabs().await?;
        if browser.tabs.read().is_empty() {
            browser.open_tab_at("about:blank").await?;
        }
        Ok(browser)
    }

    /// Reconcile our tab list with the browser's page targets: newly
    /// discovered targets are attached and appended, closed ones removed,
    /// surviving order preserved.
    async fn refresh_tabs(&self) -> Result<Vec<(String, TabInfo)>, BrowserError> {
        let result = self.cdp.send("Target.getTargets", json!({}), None).await?;
        let infos: Vec<&Value> = result["targetInfos"]
            .as_array()
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| t["type"] == "page")
                    .collect()
            })
            .unwrap_or_default();

        let live: Vec<(String, TabInfo)> = infos
            .iter()
            .map(|t| {
                (
                    t["targetId"].as_str().unwrap_or_default().to_string(),
                    TabInfo {
                        url: t["url"].as_str().unwrap_or_default().to_string(),
                        title: t["title"].as_str().unwrap_or_default().to_string(),
                    },
                )
            })
            .collect();

        let known: Vec<String> = self.tabs.read().iter().map(|t| t.target_id.clone()).collect();

        for (target_id, _) in &live {
            if !known.contains(target_id) {
                let handle = self.attach(target_id).await?;
                self.tabs.write().push(handle);
            }
        }
        self.tabs
            .write()
            .retain(|tab| live.iter().any(|(id, _)| id == &tab.target_id));

        // Report infos in our enumeration order.
        let tabs = self.tabs.read().clone();
        Ok(tabs
            .iter()
            .filter_map(|tab| {
                live.iter()
                    .find(|(id, _)| id == &tab.target_id)
                    .map(|(id, info)| (id.clone(), info.clone()))
            })
            .collect())
    }

    async fn attach(&self, target_id: &str) -> Result<TabHandle, BrowserError> {
        let result = self
            .cdp
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("attachToTarget returned no sessionId".into()))?
            .to_string();
        Ok(TabHandle {
            target_id: target_id.into(),
            session_id,
        })
    }

    /// Resolve the active tab: scan in enumeration order, awaiting each
    /// tab's visibility check to completion before comparing; the first tab
    /// reporting `visible` wins. `None` when no tab is visible.
    async fn active_tab(&self) -> Option<(usize, TabHandle)> {
        let tabs = self.tabs.read().clone();
        for (index, tab) in tabs.iter().enumerate() {
            match self.eval(tab, "document.visibilityState").await {
                Ok(value) if value.as_str() == Some("visible") => {
                    return Some((index, tab.clone()));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(target = %tab.target_id, error = %e, "visibility check failed");
                }
            }
        }
        None
    }

    async fn eval(&self, tab: &TabHandle, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .cdp
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                Some(&tab.session_id),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails") {
            let msg = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("evaluation error");
            return Err(BrowserError::Protocol(msg.into()));
        }
        Ok(result["result"]["value"].clone())
    }

    async fn ensure_element(&self, tab: &TabHandle, selector: &str) -> Result<(), BrowserError> {
        self.wait_for_on(tab, selector, ELEMENT_TIMEOUT).await
    }

    async fn wait_for_on(
        &self,
        tab: &TabHandle,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let js = format!(
            r"new Promise((resolve, reject) => {{
                if (document.querySelector({sel})) return resolve(true);
                const observer = new MutationObserver(() => {{
                    if (document.querySelector({sel})) {{
                        observer.disconnect();
                        resolve(true);
                    }}
                }});
                observer.observe(document.documentElement, {{ childList: true, subtree: true }});
                setTimeout(() => {{ observer.disconnect(); reject(new Error('not found')); }}, {t});
            }})",
            sel = js_string(selector),
            t = timeout.as_millis(),
        );
        tokio::time::timeout(timeout + Duration::from_secs(1), self.eval(tab, &js))
            .await
            .map_err(|_| BrowserError::Timeout {
                timeout,
                context: format!("waiting for {selector}"),
            })?
            .map_err(|_| BrowserError::ElementNotFound {
                selector: selector.into(),
            })?;
        Ok(())
    }

    /// Wait (bounded) for the document to finish loading.
    async fn wait_for_load(&self, tab: &TabHandle) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + NAV_TIMEOUT;
        loop {
            if let Ok(state) = self.eval(tab, "document.readyState").await {
                match state.as_str() {
                    Some("complete") | Some("interactive") => return Ok(()),
                    _ => {}
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    timeout: NAV_TIMEOUT,
                    context: "waiting for page load".into(),
                });
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn open_tab_at(&self, url: &str) -> Result<TabHandle, BrowserError> {
        let result = self
            .cdp
            .send("Target.createTarget", json!({ "url": url }), None)
            .await?;
        let target_id = result["targetId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("createTarget returned no targetId".into()))?
            .to_string();
        let handle = self.attach(&target_id).await?;
        self.tabs.write().push(handle.clone());
        self.cdp
            .send("Target.activateTarget", json!({ "targetId": target_id }), None)
            .await?;
        Ok(handle)
    }

    fn tab_at(&self, index: usize) -> Result<TabHandle, BrowserError> {
        self.tabs
            .read()
            .get(index)
            .cloned()
            .ok_or(BrowserError::NoSuchTab { index })
    }
}

#[async_trait]
impl BrowserDriver for ChromeBrowser {
    async fn snapshot(&self) -> Result<BrowserStateSnapshot, BrowserError> {
        let live = self.refresh_tabs().await?;
        let tabs: Vec<TabInfo> = live.iter().map(|(_, info)| info.clone()).collect();

        let Some((index, active)) = self.active_tab().await else {
            // No visible tab: degrade instead of failing the step.
            return Ok(BrowserStateSnapshot {
                tabs,
                ..BrowserStateSnapshot::default()
            });
        };

        let html = self
            .eval(&active, "document.documentElement.outerHTML")
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();

        let (url, title) = tabs
            .get(index)
            .map(|t| (t.url.clone(), t.title.clone()))
            .unwrap_or_default();

        Ok(BrowserStateSnapshot {
            url,
            title,
            tabs,
            active_tab: Some(index),
            content: sanitize::clean_html(&html),
        })
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(());
        };
        let result = self
            .cdp
            .send("Page.navigate", json!({ "url": url }), Some(&tab.session_id))
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.into(),
                reason: e.to_string(),
            })?;
        if let Some(error_text) = result["errorText"].as_str() {
            if !error_text.is_empty() {
                return Err(BrowserError::Navigation {
                    url: url.into(),
                    reason: error_text.into(),
                });
            }
        }
        self.wait_for_load(&tab).await
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(());
        };
        let history = self
            .cdp
            .send("Page.getNavigationHistory", json!({}), Some(&tab.session_id))
            .await?;
        let idx = history["currentIndex"].as_u64().unwrap_or(0) as usize;
        if idx > 0 {
            let entry_id = history["entries"][idx - 1]["id"].as_i64().unwrap_or(0);
            self.cdp
                .send(
                    "Page.navigateToHistoryEntry",
                    json!({ "entryId": entry_id }),
                    Some(&tab.session_id),
                )
                .await?;
            self.wait_for_load(&tab).await?;
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(());
        };
        self.cdp
            .send("Page.reload", json!({}), Some(&tab.session_id))
            .await?;
        self.wait_for_load(&tab).await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(());
        };
        self.wait_for_on(&tab, selector, timeout).await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(());
        };
        self.ensure_element(&tab, selector).await?;
        let js = format!("document.querySelector({}).click()", js_string(selector));
        let _ = self.eval(&tab, &js).await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(());
        };
        self.ensure_element(&tab, selector).await?;
        let focus = format!("document.querySelector({}).focus()", js_string(selector));
        let _ = self.eval(&tab, &focus).await?;

        for ch in text.chars() {
            self.cdp
                .send(
                    "Input.dispatchKeyEvent",
                    json!({
                        "type": "keyDown",
                        "text": ch.to_string(),
                        "key": ch.to_string(),
                    }),
                    Some(&tab.session_id),
                )
                .await?;
            self.cdp
                .send(
                    "Input.dispatchKeyEvent",
                    json!({ "type": "keyUp", "key": ch.to_string() }),
                    Some(&tab.session_id),
                )
                .await?;
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(());
        };
        self.cdp
            .send(
                "Input.dispatchKeyEvent",
                json!({ "type": "keyDown", "key": key }),
                Some(&tab.session_id),
            )
            .await?;
        self.cdp
            .send(
                "Input.dispatchKeyEvent",
                json!({ "type": "keyUp", "key": key }),
                Some(&tab.session_id),
            )
            .await?;
        Ok(())
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<(), BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(());
        };
        let _ = self.eval(&tab, &format!("window.scrollBy({dx}, {dy})")).await?;
        Ok(())
    }

    async fn extract_text(&self) -> Result<String, BrowserError> {
        let Some((_, tab)) = self.active_tab().await else {
            return Ok(String::new());
        };
        let html = self
            .eval(&tab, "document.documentElement.outerHTML")
            .await?
            .as_str()
            .map(str::to_owned)
            .unwrap_or_default();
        Ok(sanitize::clean_html(&html))
    }

    async fn open_tab(&self) -> Result<(), BrowserError> {
        self.open_tab_at("about:blank").await?;
        Ok(())
    }

    async fn close_tab(&self, index: usize) -> Result<(), BrowserError> {
        let tab = self.tab_at(index)?;
        self.cdp
            .send(
                "Target.closeTarget",
                json!({ "targetId": tab.target_id }),
                None,
            )
            .await?;
        self.tabs.write().retain(|t| t.target_id != tab.target_id);
        Ok(())
    }

    async fn switch_tab(&self, index: usize) -> Result<(), BrowserError> {
        let tab = self.tab_at(index)?;
        self.cdp
            .send(
                "Target.activateTarget",
                json!({ "targetId": tab.target_id }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn show_text_page(&self, text: &str) -> Result<(), BrowserError> {
        let tab = self.open_tab_at("about:blank").await?;
        let js = format!(
            r"(() => {{
                document.title = 'skipper transcript';
                const pre = document.createElement('pre');
                pre.textContent = {};
                document.body.replaceChildren(pre);
            }})()",
            js_string(text),
        );
        let _ = self.eval(&tab, &js).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if let Some(mut child) = self.process.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill Chrome process");
            }
        }
        Ok(())
    }
}

/// Serialize a Rust string as a JS string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

fn free_port() -> Result<u16, BrowserError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| BrowserError::Launch(format!("bind port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| BrowserError::Launch(format!("local_addr: {e}")))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll the DevTools HTTP endpoint until Chrome reports its browser-level
/// WebSocket URL.
async fn wait_for_browser_ws(port: u16) -> Result<String, BrowserError> {
    let url = format!("http://127.0.0.1:{port}/json/version");
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(body): Result<Value, _> = resp.json().await else {
            continue;
        };
        if let Some(ws_url) = body["webSocketDebuggerUrl"].as_str() {
            return Ok(ws_url.to_string());
        }
    }
    Err(BrowserError::Launch(format!(
        "Chrome did not expose DevTools within 5 seconds on port {port}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes_and_newlines() {
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
        assert_eq!(js_string("line1\nline2"), r#""line1\nline2""#);
    }

    #[test]
    fn free_port_is_nonzero() {
        assert!(free_port().unwrap() > 0);
    }
}

/// Integration tests that require a live Chrome.
#[cfg(test)]
#[cfg(feature = "browser-integration")]
mod integration_tests {
    use super::*;

    async fn launch() -> ChromeBrowser {
        ChromeBrowser::launch().await.expect("Chrome required")
    }

    #[tokio::test]
    async fn snapshot_of_blank_page() {
        let browser = launch().await;
        let snap = browser.snapshot().await.unwrap();
        assert_eq!(snap.tabs.len(), 1);
        assert!(snap.active_tab.is_some());
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn navigate_and_extract() {
        let browser = launch().await;
        browser
            .navigate("data:text/html,<h1>Hello World</h1>")
            .await
            .unwrap();
        let text = browser.extract_text().await.unwrap();
        assert!(text.contains("Hello World"));
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn open_and_switch_tabs() {
        let browser = launch().await;
        browser.open_tab().await.unwrap();
        let snap = browser.snapshot().await.unwrap();
        assert_eq!(snap.tabs.len(), 2);

        browser.switch_tab(0).await.unwrap();
        let snap = browser.snapshot().await.unwrap();
        assert_eq!(snap.active_tab, Some(0));
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn click_missing_element_is_an_error() {
        let browser = launch().await;
        browser
            .navigate("data:text/html,<p>nothing here</p>")
            .await
            .unwrap();
        let err = browser.click("#missing").await;
        assert!(err.is_err());
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn transcript_page_renders() {
        let browser = launch().await;
        browser.show_text_page("run transcript\nline two").await.unwrap();
        let text = browser.extract_text().await.unwrap();
        assert!(text.contains("run transcript"));
        browser.close().await.unwrap();
    }
}
