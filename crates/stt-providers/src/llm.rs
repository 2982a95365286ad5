//! OpenAI-compatible chat/responses client implementing [`LlmProvider`]
//! (C6's "think" phase), grounded in the same `reqwest` request-building
//! style as the teacher's chat proxy handler.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use stt_core::domain::turn::HistoryMessage;
use stt_core::error::GatewayError;
use stt_core::ports::LlmProvider;
use stt_core::with_timeout;

/// Validate an `OPENAI_CHAT_URL`/`OPENAI_RESPONSES_URL` value against the
/// fixed allow-list: must be `https`, host `api.openai.com`, and path
/// exactly `/v1/chat/completions` or `/v1/responses`. Any other shape is
/// a fatal startup error (§6).
///
/// # Errors
///
/// Returns [`GatewayError::Fatal`] describing the violation.
pub fn validate_openai_url(url: &str) -> Result<(), GatewayError> {
    let rest = url
        .strip_prefix("https://")
        .ok_or_else(|| GatewayError::Fatal(format!("OpenAI URL must use https: {url}")))?;
    let (host, path) = rest
        .split_once('/')
        .map(|(h, p)| (h, format!("/{p}")))
        .unwrap_or((rest, String::new()));
    if host != "api.openai.com" {
        return Err(GatewayError::Fatal(format!(
            "OpenAI URL host must be api.openai.com, got {host}"
        )));
    }
    if path != "/v1/chat/completions" && path != "/v1/responses" {
        return Err(GatewayError::Fatal(format!(
            "OpenAI URL path must be /v1/chat/completions or /v1/responses, got {path}"
        )));
    }
    Ok(())
}

/// `LlmProvider` backed by OpenAI's chat-completions (or responses) API.
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiChatProvider {
    /// # Errors
    ///
    /// Returns [`GatewayError::Fatal`] if `url` fails
    /// [`validate_openai_url`].
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let url = url.into();
        validate_openai_url(&url)?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            api_key: api_key.into(),
            model: model.into(),
            timeout,
        })
    }

    fn is_responses_endpoint(&self) -> bool {
        self.url.ends_with("/v1/responses")
    }

    fn extract_reply(&self, body: &serde_json::Value) -> Result<String, GatewayError> {
        if self.is_responses_endpoint() {
            if let Some(text) = body.get("output_text").and_then(serde_json::Value::as_str) {
                return Ok(text.to_string());
            }
            if let Some(text) = body
                .get("output")
                .and_then(serde_json::Value::as_array)
                .and_then(|items| items.iter().find_map(|item| item.get("content")))
                .and_then(serde_json::Value::as_array)
                .and_then(|parts| parts.iter().find_map(|part| part.get("text")))
                .and_then(serde_json::Value::as_str)
            {
                return Ok(text.to_string());
            }
        } else if let Some(text) = body
            .get("choices")
            .and_then(serde_json::Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(serde_json::Value::as_str)
        {
            return Ok(text.to_string());
        }
        Err(GatewayError::Fatal(
            "OpenAI chat response contained no recognizable reply text".to_string(),
        ))
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatProvider {
    async fn complete(
        &self,
        history: &[HistoryMessage],
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError> {
        let messages: Vec<_> = history
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let body = if self.is_responses_endpoint() {
            json!({ "model": self.model, "input": messages })
        } else {
            json!({ "model": self.model, "messages": messages })
        };

        let request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = with_timeout(cancel, "llm_complete", self.timeout, request)
            .await?
            .map_err(|err| GatewayError::AdapterTransport {
                provider: "openai-llm".to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited("openai chat completion".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Fatal(format!(
                "openai chat completion returned {status}: {text}"
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|err| GatewayError::Fatal(format!("invalid chat completion JSON: {err}")))?;
        self.extract_reply(&parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_chat_completions_path() {
        assert!(validate_openai_url("https://api.openai.com/v1/chat/completions").is_ok());
    }

    #[test]
    fn accepts_responses_path() {
        assert!(validate_openai_url("https://api.openai.com/v1/responses").is_ok());
    }

    #[test]
    fn rejects_non_https() {
        let err = validate_openai_url("http://api.openai.com/v1/chat/completions").unwrap_err();
        assert!(matches!(err, GatewayError::Fatal(_)));
    }

    #[test]
    fn rejects_wrong_host() {
        let err = validate_openai_url("https://evil.example.com/v1/chat/completions").unwrap_err();
        assert!(matches!(err, GatewayError::Fatal(_)));
    }

    #[test]
    fn rejects_wrong_path() {
        let err = validate_openai_url("https://api.openai.com/v1/embeddings").unwrap_err();
        assert!(matches!(err, GatewayError::Fatal(_)));
    }

    #[test]
    fn extract_reply_reads_chat_completions_shape() {
        let provider = OpenAiChatProvider::new(
            "https://api.openai.com/v1/chat/completions",
            "key",
            "gpt-test",
            Duration::from_secs(1),
        )
        .unwrap();
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "hi there" } }]
        });
        assert_eq!(provider.extract_reply(&body).unwrap(), "hi there");
    }

    #[test]
    fn extract_reply_reads_responses_output_text_shape() {
        let provider = OpenAiChatProvider::new(
            "https://api.openai.com/v1/responses",
            "key",
            "gpt-test",
            Duration::from_secs(1),
        )
        .unwrap();
        let body = json!({ "output_text": "hello" });
        assert_eq!(provider.extract_reply(&body).unwrap(), "hello");
    }

    #[test]
    fn extract_reply_errors_on_unrecognized_shape() {
        let provider = OpenAiChatProvider::new(
            "https://api.openai.com/v1/chat/completions",
            "key",
            "gpt-test",
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(provider.extract_reply(&json!({})).is_err());
    }
}
