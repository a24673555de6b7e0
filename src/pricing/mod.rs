//! Per-model token pricing.
//!
//! Tier resolution is substring-based on the model identifier, checked in a
//! fixed priority order so extended-context variants win over their base
//! family ("gpt-3.5-turbo-16k" matches the 16k tier before "3.5" is tried).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Safety multiplier applied on top of published upstream prices.
///
/// A deliberate over-charge: it buffers token-estimation drift and upstream
/// price changes between catalog refreshes. Every tier built from published
/// per-1000-token prices goes through this single constant.
pub const PRICE_SAFETY_MULTIPLIER: Decimal = dec!(2);

const TOKENS_PER_KILO: Decimal = dec!(1000);

/// Cost and context parameters for one model tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Charge per prompt token.
    pub input_cost_per_token: Decimal,
    /// Charge per completion token.
    pub output_cost_per_token: Decimal,
    /// Upstream context window in tokens.
    pub max_context_tokens: u64,
}

impl ModelPricing {
    /// Exact per-token rates; no scaling applied.
    pub const fn per_token(input: Decimal, output: Decimal, max_context_tokens: u64) -> Self {
        Self {
            input_cost_per_token: input,
            output_cost_per_token: output,
            max_context_tokens,
        }
    }

    /// Published per-1000-token prices, divided down and scaled by
    /// [`PRICE_SAFETY_MULTIPLIER`].
    pub fn per_kilotoken(input: Decimal, output: Decimal, max_context_tokens: u64) -> Self {
        Self {
            input_cost_per_token: input / TOKENS_PER_KILO * PRICE_SAFETY_MULTIPLIER,
            output_cost_per_token: output / TOKENS_PER_KILO * PRICE_SAFETY_MULTIPLIER,
            max_context_tokens,
        }
    }

    /// Resolve a model identifier to its pricing tier.
    pub fn resolve(model: &str) -> Result<Self> {
        if model.contains("16k") {
            Ok(Self::per_kilotoken(dec!(0.003), dec!(0.004), 16_385))
        } else if model.contains("32k") {
            Ok(Self::per_kilotoken(dec!(0.06), dec!(0.12), 32_768))
        } else if model.contains("3.5") {
            Ok(Self::per_kilotoken(dec!(0.0015), dec!(0.002), 4_097))
        } else if model.contains("4") {
            Ok(Self::per_kilotoken(dec!(0.03), dec!(0.06), 8_192))
        } else {
            Err(Error::UnknownModel {
                model: model.to_string(),
            })
        }
    }

    /// Cost of a prompt filling the whole context window.
    pub fn max_input_expense(&self) -> Decimal {
        Decimal::from(self.max_context_tokens) * self.input_cost_per_token
    }

    /// Cost of a completion filling the whole context window.
    pub fn max_output_expense(&self) -> Decimal {
        Decimal::from(self.max_context_tokens) * self.output_cost_per_token
    }
}
