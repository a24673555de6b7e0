//! OpenAI-compatible HTTP adapter for the completion boundary.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CompletionRequest, CompletionResult, CompletionService, UpstreamError};
use crate::types::{CompletionOutcome, Usage};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Upstream error code for a prompt exceeding the context window.
const CONTEXT_LENGTH_CODE: &str = "context_length_exceeded";

/// Connection settings for the OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub endpoint: String,
    /// Bearer token; Debug output stays redacted.
    pub api_key: SecretString,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_key: SecretString::from(api_key.into()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`CompletionService`] backed by an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionService {
    config: OpenAiConfig,
    http: reqwest::Client,
}

impl OpenAiCompletionService {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn send(&self, request: &CompletionRequest) -> CompletionResult {
        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(self.config.api_key.expose_secret())
            .timeout(self.config.timeout)
            .json(request)
            .send()
            .await
            .map_err(|err| self.classify_transport(err))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(UpstreamError::RateLimited { retry_after });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.classify_transport(err))?;

        if status.is_success() {
            return Self::decode_success(&body);
        }
        Err(Self::decode_error(status, &body))
    }

    fn classify_transport(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.config.timeout)
        } else {
            UpstreamError::Network(err)
        }
    }

    fn decode_success(body: &[u8]) -> CompletionResult {
        let completion: ChatCompletionBody =
            serde_json::from_slice(body).map_err(|err| UpstreamError::Malformed(err.to_string()))?;
        let Some(choice) = completion.choices.into_iter().next() else {
            return Err(UpstreamError::Malformed("response carried no choices".into()));
        };
        debug!(
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            "upstream completion succeeded"
        );
        Ok(CompletionOutcome {
            content: choice.message.content,
            usage: Usage {
                prompt_tokens: completion.usage.prompt_tokens,
                completion_tokens: completion.usage.completion_tokens,
            },
        })
    }

    fn decode_error(status: StatusCode, body: &[u8]) -> UpstreamError {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                let detail = envelope.error;
                if detail.code.as_deref() == Some(CONTEXT_LENGTH_CODE)
                    || detail.message.contains("maximum context length")
                {
                    UpstreamError::ContextLengthExceeded {
                        message: detail.message,
                    }
                } else {
                    UpstreamError::Api {
                        code: detail.code.or(detail.kind),
                        message: detail.message,
                    }
                }
            }
            Err(err) => UpstreamError::Malformed(format!("HTTP {status}: {err}")),
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionService {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> CompletionResult {
        tokio::select! {
            _ = cancel.cancelled() => Err(UpstreamError::Cancelled),
            result = self.send(request) => result,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionBody {
    choices: Vec<ChoiceBody>,
    usage: UsageBody,
}

#[derive(Debug, Deserialize)]
struct ChoiceBody {
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    content: String,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_redacted_in_debug() {
        let config = OpenAiConfig::new("sk-super-secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-super-secret"));
    }

    #[test]
    fn test_decode_success_body() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });
        let outcome =
            OpenAiCompletionService::decode_success(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(outcome.content, "hello");
        assert_eq!(outcome.usage.prompt_tokens, 12);
    }

    #[test]
    fn test_decode_context_length_error() {
        let body = serde_json::json!({
            "error": {
                "message": "This model's maximum context length is 4097 tokens.",
                "type": "invalid_request_error",
                "code": "context_length_exceeded"
            }
        });
        let err = OpenAiCompletionService::decode_error(
            StatusCode::BAD_REQUEST,
            &serde_json::to_vec(&body).unwrap(),
        );
        assert!(matches!(err, UpstreamError::ContextLengthExceeded { .. }));
    }

    #[test]
    fn test_decode_unstructured_error_is_malformed() {
        let err = OpenAiCompletionService::decode_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            b"<html>gateway exploded</html>",
        );
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }
}
