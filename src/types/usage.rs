//! Token usage as reported by the completion service.

use serde::{Deserialize, Serialize};

/// Token counts for one completed upstream call.
///
/// These are the upstream tokenizer's own numbers; billing always uses them,
/// never the gateway's pre-flight estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
}

impl Usage {
    /// Total tokens (prompt + completion).
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Content and usage returned by a successful completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    /// Assistant-authored response text.
    pub content: String,
    /// Token accounting for the call.
    pub usage: Usage,
}
