//! Usage-based billing against the per-account credit ledger.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::Result;
use crate::pricing::ModelPricing;
use crate::store::{Account, Purchase, Store};
use crate::types::Usage;

/// Cost and resulting balance of one debit.
#[derive(Debug, Clone, Copy)]
pub struct DebitReceipt {
    pub cost: Decimal,
    pub new_balance: Decimal,
}

/// Converts reported usage into cost and debits it against an account.
#[derive(Debug, Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Exact cost of a completion at the given rates.
    pub fn cost_of(usage: &Usage, pricing: &ModelPricing) -> Decimal {
        Decimal::from(usage.prompt_tokens) * pricing.input_cost_per_token
            + Decimal::from(usage.completion_tokens) * pricing.output_cost_per_token
    }

    /// Debit a completion's cost and return the receipt.
    ///
    /// The used-credit increment is an atomic store-level add, persisted
    /// before the balance is recomputed from the purchase list.
    pub async fn debit(
        &self,
        account_id: &str,
        usage: &Usage,
        pricing: &ModelPricing,
    ) -> Result<DebitReceipt> {
        let cost = Self::cost_of(usage, pricing);
        let account = self.store.add_used_credits(account_id, cost).await?;
        let new_balance = self.balance(&account).await?;
        info!(
            account_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            %cost,
            %new_balance,
            "debited completion usage"
        );
        Ok(DebitReceipt { cost, new_balance })
    }

    /// Purchased credits minus used credits.
    ///
    /// No floor clamp: an account that overdrafts between authorization and
    /// debit reports a negative balance.
    pub async fn balance(&self, account: &Account) -> Result<Decimal> {
        let purchases = self.store.list_purchases(&account.id).await?;
        let purchased: Decimal = purchases.iter().map(Purchase::credits).sum();
        Ok(purchased - account.used_credits)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::store::MemoryStore;

    fn sixteen_k_base_rates() -> ModelPricing {
        // published 16k rates divided by 1000, no safety multiplier
        ModelPricing::per_token(
            dec!(0.003) / dec!(1000),
            dec!(0.004) / dec!(1000),
            16_385,
        )
    }

    #[test]
    fn test_cost_formula_exact() {
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 200,
        };
        let cost = Ledger::cost_of(&usage, &sixteen_k_base_rates());
        assert_eq!(cost, dec!(0.0038));
    }

    #[test]
    fn test_cost_zero_usage() {
        let cost = Ledger::cost_of(&Usage::default(), &sixteen_k_base_rates());
        assert_eq!(cost, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_balance_is_purchases_minus_used() {
        let store = Arc::new(MemoryStore::new());
        let mut account = Account::new("acct", []);
        account.used_credits = dec!(2.0);
        store.save_account(&account).await.unwrap();
        store
            .save_purchase(&Purchase::new("txn-1", "acct", "4Tokens", Utc::now()))
            .await
            .unwrap();
        store
            .save_purchase(&Purchase::new("txn-2", "acct", "6Tokens", Utc::now()))
            .await
            .unwrap();

        let ledger = Ledger::new(store);
        assert_eq!(ledger.balance(&account).await.unwrap(), dec!(8.0));
    }

    #[tokio::test]
    async fn test_debit_accumulates_and_reports_balance() {
        let store = Arc::new(MemoryStore::new());
        store.save_account(&Account::new("acct", [])).await.unwrap();
        store
            .save_purchase(&Purchase::new("txn-1", "acct", "10Tokens", Utc::now()))
            .await
            .unwrap();

        let ledger = Ledger::new(Arc::clone(&store) as Arc<dyn Store>);
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 200,
        };
        let receipt = ledger
            .debit("acct", &usage, &sixteen_k_base_rates())
            .await
            .unwrap();
        assert_eq!(receipt.cost, dec!(0.0038));
        assert_eq!(receipt.new_balance, dec!(10) - dec!(0.0038));

        // second debit accumulates rather than recomputing from scratch
        let receipt = ledger
            .debit("acct", &usage, &sixteen_k_base_rates())
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, dec!(10) - dec!(0.0076));
    }

    #[tokio::test]
    async fn test_balance_may_go_negative() {
        let store = Arc::new(MemoryStore::new());
        store.save_account(&Account::new("acct", [])).await.unwrap();

        let ledger = Ledger::new(store);
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 0,
        };
        let receipt = ledger
            .debit("acct", &usage, &sixteen_k_base_rates())
            .await
            .unwrap();
        assert!(receipt.new_balance < Decimal::ZERO);
    }
}
