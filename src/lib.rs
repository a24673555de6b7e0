//! # tokengate
//!
//! Credit-metered gateway core for LLM chat completions.
//!
//! This crate fronts a third-party completion service with per-user, prepaid
//! credit control: each request is trimmed to fit the caller's remaining
//! balance before it goes out, priced from reported token usage once it comes
//! back, and debited against a per-account ledger. Purchase-confirmation
//! events carrying externally-issued aliases are reconciled into canonical
//! accounts, merging split-brain identities when alias sets intersect.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokengate::{
//!     ChatInput, Gateway, GatewayConfig, HeuristicTokenizer, MemoryStore,
//!     OpenAiCompletionService, OpenAiConfig,
//! };
//! use tokengate::types::ChatMessage;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tokengate::Error> {
//!     let gateway = Gateway::new(
//!         GatewayConfig::from_env(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(OpenAiCompletionService::new(OpenAiConfig::new("sk-..."))),
//!         Arc::new(HeuristicTokenizer),
//!     );
//!
//!     let outcome = gateway
//!         .send_messages(
//!             ChatInput {
//!                 messages: vec![
//!                     ChatMessage::system("You are a helpful assistant."),
//!                     ChatMessage::user("Hello!"),
//!                 ],
//!                 model: "gpt-3.5-turbo-16k".into(),
//!                 temperature: 0.7,
//!                 account_id: "user-123".into(),
//!                 response_budget: None,
//!             },
//!             CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("{} (cost {})", outcome.message.content, outcome.cost);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod completion;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod policy;
pub mod pricing;
pub mod shaper;
pub mod store;
pub mod tokenizer;
pub mod types;

// Re-exports for convenience
pub use completion::{
    CompletionRequest, CompletionResult, CompletionService, OpenAiCompletionService, OpenAiConfig,
    UpstreamError,
};
pub use config::{GatewayConfig, RetryConfig};
pub use gateway::{ChatInput, ChatOutcome, Gateway};
pub use identity::IdentityMerger;
pub use ledger::{DebitReceipt, Ledger};
pub use policy::RetryPolicy;
pub use pricing::{ModelPricing, PRICE_SAFETY_MULTIPLIER};
pub use shaper::{BudgetShaper, ShapedRequest};
pub use store::{Account, MemoryStore, Purchase, Store, StoreError};
pub use tokenizer::{HeuristicTokenizer, Tokenizer};
pub use types::{ChatMessage, CompletionOutcome, PurchaseEvent, Role, Usage};

use rust_decimal::Decimal;

/// Error type for tokengate operations.
///
/// Every variant except [`Error::Persistence`] carries a message safe to show
/// the caller; persistence detail stays in the log.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Model identifier matched no known pricing tier.
    #[error("unknown model: {model}")]
    UnknownModel { model: String },

    /// Remaining credit cannot cover the request even after trimming.
    #[error("insufficient funds: balance {balance} cannot cover this request")]
    InsufficientFunds { balance: Decimal },

    /// Upstream rate limit. Retried inside the policy loop; escapes only as
    /// [`Error::UpstreamUnknown`] once the retry cap is spent.
    #[error("rate limited{}", match retry_after {
        Some(d) => format!(", retry in {:.0}s", d.as_secs_f64()),
        None => String::new(),
    })]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    /// Upstream rejected the request as too long while the history was
    /// already at the minimum length. The message is the upstream's own and
    /// is user-presentable.
    #[error("{message}")]
    ContextLengthExceeded { message: String },

    /// Upstream call exceeded its deadline.
    #[error("operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),

    /// Terminal upstream failure; the message is safe to surface.
    #[error("{0}")]
    UpstreamUnknown(String),

    /// Request parameters are invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Persistence failed. The caller sees this generic message; the source
    /// detail is logged where the failure crossed the store boundary.
    #[error("a storage error occurred")]
    Persistence(#[source] store::StoreError),
}

/// Error category for unified handling at the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request cannot be served as posed (unknown model, no funds,
    /// malformed input).
    Rejected,
    /// Transient upstream condition; the policy loop retries these.
    Transient,
    /// Terminal upstream failure.
    Upstream,
    /// Storage failure; detail is internal.
    Persistence,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UnknownModel { .. }
            | Error::InsufficientFunds { .. }
            | Error::InvalidRequest(_) => ErrorCategory::Rejected,

            Error::RateLimited { .. } => ErrorCategory::Transient,

            Error::ContextLengthExceeded { .. }
            | Error::Timeout(_)
            | Error::UpstreamUnknown(_) => ErrorCategory::Upstream,

            Error::Persistence(_) => ErrorCategory::Persistence,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Whether the display message may be shown to the end user verbatim.
    pub fn is_user_presentable(&self) -> bool {
        self.category() != ErrorCategory::Persistence
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<store::StoreError> for Error {
    fn from(err: store::StoreError) -> Self {
        // single choke point: detail goes to the log, the caller gets the
        // generic Persistence message
        tracing::warn!(error = %err, "persistence failure");
        Error::Persistence(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
