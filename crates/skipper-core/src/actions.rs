use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::browser::BrowserError;

/// Declared type tag for an action parameter, rendered into the prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// One declared parameter. Declaration order is the binding order: handlers
/// receive arguments positionally in this order, regardless of how the plan's
/// args map was keyed.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    Failed(String),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Async callback invoked with positionally bound arguments.
pub type ActionHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Option<Value>, ActionError>> + Send + Sync>;

/// A named, parameterized operation exposed to the model.
///
/// Actions are authored explicitly at construction time — name, parameter
/// table, and description supplied directly — and are immutable afterwards.
#[derive(Clone)]
pub struct Action {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    handler: ActionHandler,
}

impl Action {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ParamSpec>,
        handler: F,
    ) -> Self
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Option<Value>, ActionError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            params,
            handler: Arc::new(handler),
        }
    }

    /// Invoke the handler with arguments already in declared-parameter order.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Option<Value>, ActionError> {
        (self.handler)(args).await
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_action() -> Action {
        Action::new(
            "echo",
            "Echo the arguments back",
            vec![ParamSpec::new("value", ParamKind::String)],
            |args| Box::pin(async move { Ok(Some(Value::Array(args))) }),
        )
    }

    #[tokio::test]
    async fn invoke_passes_args_through() {
        let action = echo_action();
        let out = action.invoke(vec![json!("hi")]).await.unwrap();
        assert_eq!(out, Some(json!(["hi"])));
    }

    #[tokio::test]
    async fn handler_failure_surfaces_as_error() {
        let action = Action::new("boom", "Always fails", vec![], |_| {
            Box::pin(async { Err(ActionError::Failed("nope".into())) })
        });
        let err = action.invoke(vec![]).await.unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn param_kind_strings() {
        assert_eq!(ParamKind::String.as_str(), "string");
        assert_eq!(ParamKind::Integer.as_str(), "integer");
        assert_eq!(ParamKind::Number.as_str(), "number");
        assert_eq!(ParamKind::Boolean.as_str(), "boolean");
    }

    #[test]
    fn browser_error_converts() {
        let err: ActionError = BrowserError::ElementNotFound {
            selector: "#x".into(),
        }
        .into();
        assert!(err.to_string().contains("#x"));
    }
}
