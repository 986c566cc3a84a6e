//! OpenAI-compatible chat-completions client with model fallback.
//!
//! The chain walks an ordered list of model identifiers. Per model it makes
//! up to three attempts, backing off 15 s then 30 s when the endpoint
//! signals throttling; once a model's attempts are spent it moves to the
//! next. Non-throttling errors propagate immediately. Any endpoint speaking
//! the chat-completions wire format works through `LLM_BASE_URL`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, LanguageModel, LlmError};

/// Backoff delays applied before the second and third attempt on a model.
const RATE_LIMIT_BACKOFF: [Duration; 2] = [Duration::from_secs(15), Duration::from_secs(30)];

/// Attempts per model before moving down the chain.
const ATTEMPTS_PER_MODEL: usize = 3;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

/// Production [`LanguageModel`] binding: chat-completions over HTTP with a
/// model fallback chain.
pub struct FallbackClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    models: Vec<String>,
    backoff: Vec<Duration>,
}

impl FallbackClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, models: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            models,
            backoff: RATE_LIMIT_BACKOFF.to_vec(),
        }
    }

    /// Overrides the rate-limit backoff delays (test hook).
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    async fn complete_with_model(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::Unconfigured)?;

        let request = CompletionRequest { model, messages };
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_rate_limit(status, &body) {
                return Err(LlmError::RateLimited(format!("{model}: {status}")));
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::NoContent)
    }
}

/// Throttling is signalled by HTTP 429 or by quota language in the body.
fn is_rate_limit(status: StatusCode, body: &str) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || body.contains("quota")
        || body.contains("Too Many Requests")
}

#[async_trait]
impl LanguageModel for FallbackClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let mut last_rate_limit = String::new();

        for model in &self.models {
            for attempt in 0..ATTEMPTS_PER_MODEL {
                match self.complete_with_model(model, messages).await {
                    Ok(text) => return Ok(text),
                    Err(e) if e.is_rate_limit() => {
                        last_rate_limit = e.to_string();
                        tracing::warn!(model, attempt, "model rate limited");
                        if let Some(delay) = self.backoff.get(attempt) {
                            tokio::time::sleep(*delay).await;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            tracing::warn!(model, "rate-limit retries exhausted, trying next model");
        }

        Err(LlmError::Exhausted(last_rate_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    fn client(server: &MockServer, models: &[&str]) -> FallbackClient {
        FallbackClient::new(
            format!("{}/v1/chat/completions", server.uri()),
            Some("test-key".to_string()),
            models.iter().map(|m| m.to_string()).collect(),
        )
        .with_backoff(vec![Duration::from_millis(1), Duration::from_millis(1)])
    }

    #[tokio::test]
    async fn returns_first_model_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("[]")))
            .mount(&server)
            .await;

        let client = client(&server, &["model-a"]);
        let text = client.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(text, "[]");
    }

    #[tokio::test]
    async fn falls_through_to_next_model_on_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("model-a"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("model-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .mount(&server)
            .await;

        let client = client(&server, &["model-a", "model-b"]);
        let text = client.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn exhaustion_reported_when_every_model_throttles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client(&server, &["model-a", "model-b"]);
        let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Exhausted(_)));
    }

    #[tokio::test]
    async fn non_rate_limit_error_propagates_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, &["model-a", "model-b"]);
        let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn quota_body_counts_as_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("insufficient quota"))
            .mount(&server)
            .await;

        let client = client(&server, &["model-a"]);
        let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Exhausted(_)));
    }

    #[tokio::test]
    async fn missing_key_is_unconfigured() {
        let client = FallbackClient::new("http://localhost:0", None, vec!["m".to_string()]);
        let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Unconfigured));
    }
}
