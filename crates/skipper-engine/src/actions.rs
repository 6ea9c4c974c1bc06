//! Built-in browser actions.
//!
//! Every action the model can invoke against the browser, authored as an
//! explicit table at construction time. Argument values arrive positionally
//! in declared-parameter order; each handler validates its own types.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use skipper_core::actions::{Action, ActionError, ParamKind, ParamSpec};
use skipper_core::browser::BrowserDriver;

/// Build the full built-in action table over a browser driver. The `done`
/// action cancels `shutdown`, ending the run after the current plan.
pub fn builtin_actions(
    driver: Arc<dyn BrowserDriver>,
    shutdown: CancellationToken,
) -> Vec<Action> {
    let mut actions = Vec::new();

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "navigate",
            "Open a URL in the active tab and wait for it to load",
            vec![ParamSpec::new("url", ParamKind::String)],
            move |args| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let url = require_str(&args, 0, "url")?;
                    driver.navigate(&url).await?;
                    Ok(Some(json!(format!("navigated to {url}"))))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "goBack",
            "Go back one entry in the active tab's history",
            vec![],
            move |_| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    driver.go_back().await?;
                    Ok(Some(json!("navigated back")))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "reload",
            "Reload the active tab",
            vec![],
            move |_| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    driver.reload().await?;
                    Ok(Some(json!("page reloaded")))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "click",
            "Click the element matching a CSS selector",
            vec![ParamSpec::new("selector", ParamKind::String)],
            move |args| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let selector = require_str(&args, 0, "selector")?;
                    driver.click(&selector).await?;
                    Ok(Some(json!(format!("clicked {selector}"))))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "typeText",
            "Focus the element matching a CSS selector and type text into it",
            vec![
                ParamSpec::new("selector", ParamKind::String),
                ParamSpec::new("text", ParamKind::String),
            ],
            move |args| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let selector = require_str(&args, 0, "selector")?;
                    let text = require_str(&args, 1, "text")?;
                    driver.type_text(&selector, &text).await?;
                    Ok(Some(json!(format!("typed into {selector}"))))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "pressKey",
            "Press a keyboard key (e.g. Enter, Tab, ArrowDown)",
            vec![ParamSpec::new("key", ParamKind::String)],
            move |args| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let key = require_str(&args, 0, "key")?;
                    driver.press_key(&key).await?;
                    Ok(Some(json!(format!("pressed {key}"))))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "scroll",
            "Scroll the active page by a pixel offset (positive dy scrolls down)",
            vec![
                ParamSpec::new("dx", ParamKind::Integer),
                ParamSpec::new("dy", ParamKind::Integer),
            ],
            move |args| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let dx = require_int(&args, 0, "dx")?;
                    let dy = require_int(&args, 1, "dy")?;
                    driver.scroll_by(dx, dy).await?;
                    Ok(Some(json!(format!("scrolled by ({dx}, {dy})"))))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "waitFor",
            "Wait until a CSS selector matches, up to timeoutMs milliseconds",
            vec![
                ParamSpec::new("selector", ParamKind::String),
                ParamSpec::new("timeoutMs", ParamKind::Integer),
            ],
            move |args| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let selector = require_str(&args, 0, "selector")?;
                    let timeout_ms = require_int(&args, 1, "timeoutMs")?.max(0) as u64;
                    driver
                        .wait_for(&selector, Duration::from_millis(timeout_ms))
                        .await?;
                    Ok(Some(json!(format!("element {selector} found"))))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "extractContent",
            "Return the sanitized text content of the active page",
            vec![],
            move |_| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let text = driver.extract_text().await?;
                    Ok(Some(Value::String(text)))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "openNewTab",
            "Open a new empty tab and make it active",
            vec![],
            move |_| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    driver.open_tab().await?;
                    Ok(Some(json!("opened new tab")))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "switchTab",
            "Switch to the tab with the given number from the tab list",
            vec![ParamSpec::new("tab", ParamKind::Integer)],
            move |args| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let tab = require_tab_number(&args, 0)?;
                    driver.switch_tab(tab).await?;
                    Ok(Some(json!(format!("switched to tab {}", tab + 1))))
                })
            },
        ));
    }

    {
        let driver = Arc::clone(&driver);
        actions.push(Action::new(
            "closeTab",
            "Close the tab with the given number from the tab list",
            vec![ParamSpec::new("tab", ParamKind::Integer)],
            move |args| {
                let driver = Arc::clone(&driver);
                Box::pin(async move {
                    let tab = require_tab_number(&args, 0)?;
                    driver.close_tab(tab).await?;
                    Ok(Some(json!(format!("closed tab {}", tab + 1))))
                })
            },
        ));
    }

    {
        actions.push(Action::new(
            "done",
            "Finish the run; call this once the task is complete",
            vec![],
            move |_| {
                let shutdown = shutdown.clone();
                Box::pin(async move {
                    shutdown.cancel();
                    Ok(None)
                })
            },
        ));
    }

    actions
}

fn require_str(args: &[Value], index: usize, name: &str) -> Result<String, ActionError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ActionError::InvalidArguments(format!("{name} must be a string")))
}

fn require_int(args: &[Value], index: usize, name: &str) -> Result<i64, ActionError> {
    args.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| ActionError::InvalidArguments(format!("{name} must be an integer")))
}

/// Tab numbers in prompts are one-based; drivers index from zero.
fn require_tab_number(args: &[Value], index: usize) -> Result<usize, ActionError> {
    let n = require_int(args, index, "tab")?;
    if n < 1 {
        return Err(ActionError::InvalidArguments(format!(
            "tab must be a positive tab number, got {n}"
        )));
    }
    Ok((n - 1) as usize)
}
