//! Proactive trimming of chat history to fit prepaid credit.
//!
//! Eviction is FIFO over the non-system history: the system message at
//! position 0 survives unconditionally, removal always targets position 1,
//! and a sequence that already fits comes back untouched.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::debug;

use crate::pricing::ModelPricing;
use crate::tokenizer::Tokenizer;
use crate::types::ChatMessage;
use crate::{Error, Result};

/// Reservations above this share of the tier's maximum output cost leave the
/// completion uncapped; a caller funding most of the window gets no
/// artificial ceiling.
const UNCAPPED_OUTPUT_SHARE: Decimal = dec!(0.75);

/// A message sequence trimmed to budget, plus the output cap derived from the
/// caller's reservation.
#[derive(Debug, Clone)]
pub struct ShapedRequest {
    pub messages: Vec<ChatMessage>,
    pub max_output_tokens: Option<u32>,
}

/// Trims message histories and bounds output length to available credit.
#[derive(Debug, Clone)]
pub struct BudgetShaper {
    tokenizer: Arc<dyn Tokenizer>,
    min_messages: usize,
}

impl BudgetShaper {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, min_messages: usize) -> Self {
        Self {
            tokenizer,
            min_messages,
        }
    }

    /// Fit `messages` into `available_credit`, optionally reserving part of
    /// it for the response.
    ///
    /// Fails with [`Error::InsufficientFunds`] when the sequence is still
    /// over budget at the minimum length (system message plus one).
    pub fn fit(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        available_credit: Decimal,
        reserved_output: Option<Decimal>,
    ) -> Result<ShapedRequest> {
        let pricing = ModelPricing::resolve(model)?;
        self.fit_with_pricing(messages, &pricing, available_credit, reserved_output)
    }

    /// [`BudgetShaper::fit`] for callers that already hold exact rates.
    pub fn fit_with_pricing(
        &self,
        messages: Vec<ChatMessage>,
        pricing: &ModelPricing,
        available_credit: Decimal,
        reserved_output: Option<Decimal>,
    ) -> Result<ShapedRequest> {
        let reserved = reserved_output.unwrap_or(Decimal::ZERO);
        let input_budget = available_credit.min(pricing.max_input_expense()) - reserved;
        let max_output_tokens = self.output_cap(pricing, reserved_output);

        let mut messages = messages;
        let mut estimate = self.estimated_input_cost(&messages, pricing);
        while estimate > input_budget && messages.len() > self.min_messages {
            let dropped = messages.remove(1);
            debug!(
                role = %dropped.role,
                remaining = messages.len(),
                %estimate,
                %input_budget,
                "evicted oldest non-system message"
            );
            estimate = self.estimated_input_cost(&messages, pricing);
        }

        if estimate > input_budget {
            return Err(Error::InsufficientFunds {
                balance: available_credit,
            });
        }

        Ok(ShapedRequest {
            messages,
            max_output_tokens,
        })
    }

    /// Token ceiling bought by the output reservation. No reservation, or
    /// one large enough to fund most of the window, means no ceiling.
    fn output_cap(&self, pricing: &ModelPricing, reserved_output: Option<Decimal>) -> Option<u32> {
        let reserved = reserved_output?;
        if reserved > pricing.max_output_expense() * UNCAPPED_OUTPUT_SHARE {
            return None;
        }
        if pricing.output_cost_per_token <= Decimal::ZERO {
            return None;
        }
        (reserved / pricing.output_cost_per_token).floor().to_u32()
    }

    fn estimated_input_cost(&self, messages: &[ChatMessage], pricing: &ModelPricing) -> Decimal {
        let tokens: u64 = messages
            .iter()
            .map(|m| {
                self.tokenizer
                    .count(&format!("{}{}", m.role.as_str(), m.content))
            })
            .sum();
        Decimal::from(tokens) * pricing.input_cost_per_token
    }
}
