//! Reactive retry/trim policy around a completion call.
//!
//! The budget shaper trims proactively from its own token estimate; this
//! loop is the backstop for the cases where that estimate under-counts
//! relative to the upstream tokenizer, or the upstream is transiently
//! unavailable. Retryable failures never escape: they either resolve within
//! the loop or come out as terminal errors.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::completion::{CompletionRequest, CompletionService, UpstreamError};
use crate::config::RetryConfig;
use crate::types::CompletionOutcome;
use crate::{Error, Result};

/// Drives one completion request to a terminal outcome.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry: RetryConfig,
    min_messages: usize,
}

impl RetryPolicy {
    pub fn new(retry: RetryConfig, min_messages: usize) -> Self {
        Self {
            retry,
            min_messages,
        }
    }

    /// Run the request, retrying rate limits on a fixed interval up to the
    /// configured cap and shedding the oldest non-system message on upstream
    /// context overflow. Trim retries are bounded by the message count
    /// itself: at most `len - min_messages` before the upstream error is
    /// surfaced verbatim.
    pub async fn execute(
        &self,
        service: &dyn CompletionService,
        mut request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionOutcome> {
        let mut rate_limit_attempts = 0u32;
        loop {
            match service.complete(&request, cancel).await {
                Ok(outcome) => return Ok(outcome),

                Err(UpstreamError::RateLimited { retry_after }) => {
                    rate_limit_attempts += 1;
                    if rate_limit_attempts > self.retry.max_rate_limit_retries {
                        return Err(Error::UpstreamUnknown(format!(
                            "upstream rate limit persisted across {} retries",
                            self.retry.max_rate_limit_retries
                        )));
                    }
                    let wait = retry_after
                        .filter(|after| *after > self.retry.rate_limit_interval)
                        .unwrap_or(self.retry.rate_limit_interval);
                    debug!(
                        attempt = rate_limit_attempts,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }

                Err(UpstreamError::ContextLengthExceeded { message }) => {
                    if request.messages.len() > self.min_messages {
                        request.messages.remove(1);
                        debug!(
                            remaining = request.messages.len(),
                            "upstream context overflow, shedding oldest non-system message"
                        );
                    } else {
                        // nothing left to shed; the upstream wording is
                        // user-presentable
                        return Err(Error::ContextLengthExceeded { message });
                    }
                }

                Err(UpstreamError::Timeout(elapsed)) => return Err(Error::Timeout(elapsed)),

                Err(UpstreamError::Api { code, message }) => {
                    debug!(code = code.as_deref().unwrap_or(""), "upstream rejected request");
                    return Err(Error::UpstreamUnknown(message));
                }

                Err(UpstreamError::Malformed(detail)) => {
                    warn!(error = %detail, "upstream response could not be decoded");
                    return Err(Error::UpstreamUnknown(
                        "upstream response could not be decoded".into(),
                    ));
                }

                Err(UpstreamError::Network(err)) => {
                    warn!(error = %err, "upstream request failed");
                    return Err(Error::UpstreamUnknown("upstream request failed".into()));
                }

                Err(UpstreamError::Cancelled) => {
                    return Err(Error::UpstreamUnknown(
                        "request was cancelled before completion".into(),
                    ));
                }
            }
        }
    }
}
