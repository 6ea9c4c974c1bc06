use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use skipper_core::completion::{CompletionClient, CompletionError, CompletionRequest};

/// Pre-programmed completion outcomes for deterministic testing without
/// API calls.
pub enum ScriptedResponse {
    /// Return this text as the completion.
    Reply(String),
    /// Fail the request with this classified error.
    Error(CompletionError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(text.into())
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock completion client that replays scripted responses in sequence.
/// Requests beyond the script fail with `Other`.
pub struct MockClient {
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: AtomicUsize,
    /// Captured copies of every request, for prompt-shape assertions.
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockClient {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let idx = self.calls.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(response) = self.script.lock().pop_front() else {
            return Err(CompletionError::Other(format!(
                "MockClient: no response configured for call {idx}"
            )));
        };

        let mut current = response;
        loop {
            match current {
                ScriptedResponse::Reply(text) => return Ok(text),
                ScriptedResponse::Error(err) => return Err(err),
                ScriptedResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skipper_core::completion::PromptBlock;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "sys".into(),
            input: vec![PromptBlock::user("state")],
            max_tokens: 1024,
        }
    }

    #[tokio::test]
    async fn replays_in_sequence() {
        let mock = MockClient::new(vec![
            ScriptedResponse::reply("first"),
            ScriptedResponse::reply("second"),
        ]);
        assert_eq!(mock.complete(&request()).await.unwrap(), "first");
        assert_eq!(mock.complete(&request()).await.unwrap(), "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_error_is_returned() {
        let mock = MockClient::new(vec![ScriptedResponse::Error(
            CompletionError::TokenLimitExceeded,
        )]);
        let err = mock.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::TokenLimitExceeded));
    }

    #[tokio::test]
    async fn exhausted_script_fails() {
        let mock = MockClient::new(vec![ScriptedResponse::reply("only one")]);
        let _ = mock.complete(&request()).await;
        let err = mock.complete(&request()).await.unwrap_err();
        assert!(matches!(err, CompletionError::Other(_)));
    }

    #[tokio::test]
    async fn delayed_response_waits() {
        tokio::time::pause();
        let mock = MockClient::new(vec![ScriptedResponse::delayed(
            Duration::from_millis(50),
            ScriptedResponse::reply("after delay"),
        )]);
        let start = tokio::time::Instant::now();
        let text = mock.complete(&request()).await.unwrap();
        assert_eq!(text, "after delay");
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn captures_requests() {
        let mock = MockClient::new(vec![ScriptedResponse::reply("ok")]);
        let _ = mock.complete(&request()).await;
        let captured = mock.requests();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].system, "sys");
        assert_eq!(captured[0].input.len(), 1);
    }

    #[test]
    fn model_name() {
        let mock = MockClient::new(vec![]);
        assert_eq!(mock.model(), "mock-model");
    }
}
