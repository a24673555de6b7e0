//! Completion service boundary.
//!
//! The sole network dependency of the gateway. Implementations return either
//! a [`CompletionOutcome`] or a structured [`UpstreamError`] the retry/trim
//! policy can classify.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::{ChatMessage, CompletionOutcome};

mod openai;

pub use openai::{OpenAiCompletionService, OpenAiConfig};

/// One outbound completion call, already shaped to budget.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// End-user identifier forwarded for upstream abuse tracking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Structured upstream failure, classified for the retry/trim policy.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Explicit too-many-requests signal.
    #[error("rate limited upstream")]
    RateLimited { retry_after: Option<Duration> },

    /// The request exceeded the model's context window. The message is the
    /// upstream's own wording and is user-presentable.
    #[error("{message}")]
    ContextLengthExceeded { message: String },

    /// The call exceeded its deadline.
    #[error("upstream call timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Structured error payload from the upstream API.
    #[error("{message}")]
    Api {
        code: Option<String>,
        message: String,
    },

    /// Response body could not be decoded. Detail is for the log, not the
    /// caller.
    #[error("malformed upstream response: {0}")]
    Malformed(String),

    /// Transport-level failure.
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// The caller's cancellation token fired before a response arrived.
    #[error("request was cancelled")]
    Cancelled,
}

/// What a completion call resolves to.
pub type CompletionResult = std::result::Result<CompletionOutcome, UpstreamError>;

/// Executes the actual model call.
#[async_trait]
pub trait CompletionService: Send + Sync + Debug {
    /// Run one completion. `cancel` is scoped to this request; a fired token
    /// abandons the upstream call and nothing else.
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> CompletionResult;
}
