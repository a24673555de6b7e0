//! The exposed shape-and-bill surface.
//!
//! One operation shapes, executes and bills a chat completion; one folds a
//! purchase-confirmation event into the ledger; one reads a balance. The
//! HTTP layer in front of this crate does nothing but decode envelopes and
//! call these.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::completion::{CompletionRequest, CompletionService};
use crate::config::GatewayConfig;
use crate::identity::IdentityMerger;
use crate::ledger::Ledger;
use crate::policy::RetryPolicy;
use crate::pricing::ModelPricing;
use crate::shaper::BudgetShaper;
use crate::store::{Purchase, Store};
use crate::tokenizer::Tokenizer;
use crate::types::{ChatMessage, PurchaseEvent};
use crate::Result;

/// One inbound chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f64,
    /// Any alias of the caller's account.
    pub account_id: String,
    /// Credit to reserve for the response, deducted from the input budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_budget: Option<Decimal>,
}

/// Billed result of one chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOutcome {
    pub message: ChatMessage,
    pub cost: Decimal,
    pub new_balance: Decimal,
}

/// Budget-aware front for a completion service.
pub struct Gateway {
    store: Arc<dyn Store>,
    completion: Arc<dyn CompletionService>,
    ledger: Ledger,
    merger: IdentityMerger,
    shaper: BudgetShaper,
    policy: RetryPolicy,
    // serializes the balance-read + shape span per canonical account id
    account_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn Store>,
        completion: Arc<dyn CompletionService>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            ledger: Ledger::new(Arc::clone(&store)),
            merger: IdentityMerger::new(Arc::clone(&store)),
            shaper: BudgetShaper::new(tokenizer, config.min_messages),
            policy: RetryPolicy::new(config.retry.clone(), config.min_messages),
            store,
            completion,
            account_locks: DashMap::new(),
        }
    }

    /// Shape a chat request to the caller's balance, execute it upstream and
    /// debit the reported usage.
    ///
    /// `cancel` is scoped to this request and only ever abandons the
    /// upstream call; once the debit begins it runs to completion.
    pub async fn send_messages(
        &self,
        input: ChatInput,
        cancel: CancellationToken,
    ) -> Result<ChatOutcome> {
        // resolve pricing before touching the ledger so unknown models fail
        // without creating an account
        let pricing = ModelPricing::resolve(&input.model)?;
        let account = self
            .merger
            .reconcile(std::slice::from_ref(&input.account_id))
            .await?;

        let shaped = {
            let lock = self.lock_for(&account.id);
            let _guard = lock.lock().await;
            let balance = self.ledger.balance(&account).await?;
            self.shaper.fit_with_pricing(
                input.messages,
                &pricing,
                balance,
                input.response_budget,
            )?
        };
        // no account lock is held from here on; policy backoff sleeps must
        // not block other requests for this account

        let request = CompletionRequest {
            model: input.model,
            messages: shaped.messages,
            temperature: input.temperature,
            max_tokens: shaped.max_output_tokens,
            user: Some(account.id.clone()),
        };
        let outcome = self
            .policy
            .execute(self.completion.as_ref(), request, &cancel)
            .await?;

        let receipt = self
            .ledger
            .debit(&account.id, &outcome.usage, &pricing)
            .await?;

        Ok(ChatOutcome {
            message: ChatMessage::assistant(outcome.content),
            cost: receipt.cost,
            new_balance: receipt.new_balance,
        })
    }

    /// Fold a purchase-confirmation event into the ledger and return the
    /// resulting balance. Duplicate deliveries of a transaction id are
    /// idempotent.
    pub async fn reconcile_purchase(&self, event: PurchaseEvent) -> Result<Decimal> {
        let account = self.merger.reconcile(&event.aliases).await?;
        let purchased_at = event.purchased_at();
        let purchase = Purchase::new(
            event.transaction_id,
            account.id.clone(),
            event.product_id,
            purchased_at,
        );
        self.store.save_purchase(&purchase).await?;
        let balance = self.ledger.balance(&account).await?;
        info!(
            account_id = %account.id,
            product_id = %purchase.product_id,
            %balance,
            "recorded purchase"
        );
        Ok(balance)
    }

    /// Current balance for any alias of an account.
    pub async fn balance_of(&self, alias: &str) -> Result<Decimal> {
        let aliases = [alias.to_string()];
        let account = self.merger.reconcile(&aliases).await?;
        self.ledger.balance(&account).await
    }

    fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.account_locks
            .entry(account_id.to_string())
            .or_default()
            .clone()
    }
}
