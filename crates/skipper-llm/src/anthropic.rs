use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use skipper_core::completion::{CompletionClient, CompletionError, CompletionRequest};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Non-streaming Messages API client.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            api_key: api_key.into(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request
            .input
            .iter()
            .map(|block| {
                json!({
                    "role": block.role.as_str(),
                    "content": block.content,
                })
            })
            .collect();

        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": messages,
        })
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let resp = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("accept", "application/json")
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| CompletionError::Other(format!("network error: {e}")))?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(CompletionError::RateLimited { retry_after });
        }
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status, &body));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| CompletionError::Other(format!("malformed response body: {e}")))?;

        let text = extract_text(&body).ok_or_else(|| {
            CompletionError::Other(format!("no text block in response: {body}"))
        })?;
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

/// Concatenate the text content blocks of a Messages API response.
fn extract_text(body: &Value) -> Option<String> {
    let blocks = body.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skipper_core::completion::PromptBlock;

    #[test]
    fn client_uses_default_model_when_none() {
        let client = AnthropicClient::new("test-key", None);
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn client_uses_given_model() {
        let client = AnthropicClient::new("test-key", Some("claude-haiku-4-5"));
        assert_eq!(client.model(), "claude-haiku-4-5");
    }

    #[test]
    fn body_carries_system_and_ordered_messages() {
        let client = AnthropicClient::new("test-key", None);
        let request = CompletionRequest {
            system: "you are a browser agent".into(),
            input: vec![
                PromptBlock::user("step 1 happened"),
                PromptBlock::user("current page: example.com"),
            ],
            max_tokens: 2048,
        };
        let body = client.build_body(&request);
        assert_eq!(body["system"], "you are a browser agent");
        assert_eq!(body["max_tokens"], 2048);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "step 1 happened");
        assert_eq!(messages[1]["content"], "current page: example.com");
    }

    #[test]
    fn extract_text_joins_text_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "{\"state\""},
                {"type": "text", "text": ": {}}"},
            ]
        });
        assert_eq!(extract_text(&body).unwrap(), "{\"state\": {}}");
    }

    #[test]
    fn extract_text_ignores_non_text_blocks() {
        let body = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "plan"},
            ]
        });
        assert_eq!(extract_text(&body).unwrap(), "plan");
    }

    #[test]
    fn extract_text_empty_content_is_none() {
        assert!(extract_text(&json!({"content": []})).is_none());
        assert!(extract_text(&json!({})).is_none());
    }
}
