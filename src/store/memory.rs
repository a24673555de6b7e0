//! In-memory store backend.
//!
//! All state lives behind one `RwLock`; compound operations take the write
//! guard once, which is what makes `add_used_credits` and `merge_accounts`
//! atomic here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{Account, Purchase, Store, StoreError};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    purchases: HashMap<String, Purchase>,
}

/// Store backend keeping everything in process memory.
///
/// The default backend for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live accounts, for assertions in tests.
    pub async fn account_count(&self) -> usize {
        self.inner.read().await.accounts.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_accounts_by_aliases(
        &self,
        aliases: &[String],
    ) -> Result<Vec<Account>, StoreError> {
        let state = self.inner.read().await;
        let mut matches: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| aliases.iter().any(|alias| account.has_alias(alias)))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        let mut stored = account.clone();
        stored.updated_at = Utc::now();
        state.accounts.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn list_purchases(&self, account_id: &str) -> Result<Vec<Purchase>, StoreError> {
        let state = self.inner.read().await;
        let mut purchases: Vec<Purchase> = state
            .purchases
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        purchases.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(purchases)
    }

    async fn save_purchase(&self, purchase: &Purchase) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        if state.purchases.contains_key(&purchase.id) {
            tracing::debug!(transaction_id = %purchase.id, "duplicate purchase delivery ignored");
            return Ok(());
        }
        state
            .purchases
            .insert(purchase.id.clone(), purchase.clone());
        Ok(())
    }

    async fn reassign_purchases(&self, from: &[String], to: &str) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        for purchase in state.purchases.values_mut() {
            if from.iter().any(|id| *id == purchase.account_id) {
                purchase.account_id = to.to_string();
            }
        }
        Ok(())
    }

    async fn delete_accounts(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        for id in ids {
            state.accounts.remove(id);
        }
        Ok(())
    }

    async fn add_used_credits(
        &self,
        account_id: &str,
        amount: Decimal,
    ) -> Result<Account, StoreError> {
        let mut state = self.inner.write().await;
        let account = state
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::AccountNotFound {
                id: account_id.to_string(),
            })?;
        account.used_credits += amount;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn merge_accounts(
        &self,
        survivor: &Account,
        absorbed: &[String],
    ) -> Result<(), StoreError> {
        // one write guard for the whole merge
        let mut state = self.inner.write().await;
        let mut stored = survivor.clone();
        stored.updated_at = Utc::now();
        state.accounts.insert(stored.id.clone(), stored);
        for purchase in state.purchases.values_mut() {
            if absorbed.iter().any(|id| *id == purchase.account_id) {
                purchase.account_id = survivor.id.clone();
            }
        }
        for id in absorbed {
            state.accounts.remove(id);
        }
        Ok(())
    }
}
