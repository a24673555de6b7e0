//! Account and purchase records plus the persistence boundary.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod memory;

pub use memory::MemoryStore;

/// Label substring the payment provider embeds in credit product ids.
///
/// Hard external contract with the provider's product catalog: a product id
/// is the credit amount with this label appended ("10Tokens" grants 10).
pub const PRODUCT_CREDIT_LABEL: &str = "Tokens";

/// Canonical billing identity.
///
/// Owned by the identity merger; mutated only through merge and ledger-debit
/// operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Canonical id, always a member of `aliases`.
    pub id: String,
    /// Every externally-issued identifier known to refer to this payer.
    pub aliases: Vec<String>,
    /// Cumulative debited cost. Only ever increases.
    pub used_credits: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: impl Into<String>, aliases: impl IntoIterator<Item = String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        let mut account = Self {
            id: id.clone(),
            aliases: vec![id],
            used_credits: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        account.absorb_aliases(aliases);
        account
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }

    /// Union `incoming` into the alias set, preserving first-seen order.
    /// Returns true if anything new was added.
    pub fn absorb_aliases(&mut self, incoming: impl IntoIterator<Item = String>) -> bool {
        let mut changed = false;
        for alias in incoming {
            if !self.has_alias(&alias) {
                self.aliases.push(alias);
                changed = true;
            }
        }
        changed
    }
}

/// One completed transaction. Immutable once created; re-pointed, never
/// deleted, when its owner is absorbed in a merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    /// Upstream transaction id; unique across all purchases.
    pub id: String,
    pub account_id: String,
    pub product_id: String,
    pub purchased_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Purchase {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        product_id: impl Into<String>,
        purchased_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            product_id: product_id.into(),
            purchased_at,
            created_at: Utc::now(),
        }
    }

    /// Credits granted by this purchase, decoded from the product id by the
    /// [`PRODUCT_CREDIT_LABEL`] convention. Anything unparseable grants 0;
    /// the convention carries no independent validation.
    pub fn credits(&self) -> Decimal {
        self.product_id
            .replace(PRODUCT_CREDIT_LABEL, "")
            .parse()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Errors from the persistence boundary.
///
/// Detail here is internal; the crate-level error wraps these with a generic
/// caller-facing message.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account not found: {id}")]
    AccountNotFound { id: String },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Persistence operations the gateway core requires.
///
/// Implementations must make [`Store::add_used_credits`] an atomic
/// read-modify-write and [`Store::merge_accounts`] all-or-nothing; both carry
/// the invariants that keep the ledger and alias sets consistent under
/// concurrency.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Every account whose alias set intersects `aliases`, in stable
    /// (id-sorted) order.
    async fn find_accounts_by_aliases(
        &self,
        aliases: &[String],
    ) -> Result<Vec<Account>, StoreError>;

    /// Insert or update an account by id.
    async fn save_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Purchases owned by the account, oldest first.
    async fn list_purchases(&self, account_id: &str) -> Result<Vec<Purchase>, StoreError>;

    /// Insert a purchase. A purchase already on record under the same
    /// transaction id wins; the duplicate delivery is dropped.
    async fn save_purchase(&self, purchase: &Purchase) -> Result<(), StoreError>;

    /// Re-point every purchase owned by `from` accounts at `to`.
    async fn reassign_purchases(&self, from: &[String], to: &str) -> Result<(), StoreError>;

    /// Delete the named accounts. Missing ids are not an error.
    async fn delete_accounts(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Atomically add `amount` to the account's used-credit counter and
    /// return the updated record.
    async fn add_used_credits(
        &self,
        account_id: &str,
        amount: Decimal,
    ) -> Result<Account, StoreError>;

    /// Commit a merge: persist the survivor, re-point every absorbed
    /// account's purchases at it, delete the absorbed accounts.
    ///
    /// The whole operation must be all-or-nothing; partial application would
    /// leave an alias owned by two live accounts. The default implementation
    /// composes the fine-grained operations sequentially and is only suitable
    /// where the backend session is already transactional; other backends
    /// must override it with a single transaction.
    async fn merge_accounts(
        &self,
        survivor: &Account,
        absorbed: &[String],
    ) -> Result<(), StoreError> {
        self.save_account(survivor).await?;
        self.reassign_purchases(absorbed, &survivor.id).await?;
        self.delete_accounts(absorbed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_account_id_always_among_aliases() {
        let account = Account::new("primary", ["other".to_string()]);
        assert!(account.has_alias("primary"));
        assert!(account.has_alias("other"));
    }

    #[test]
    fn test_absorb_aliases_dedups() {
        let mut account = Account::new("a", []);
        assert!(account.absorb_aliases(["b".to_string(), "a".to_string()]));
        assert_eq!(account.aliases, vec!["a", "b"]);
        assert!(!account.absorb_aliases(["b".to_string()]));
    }

    #[test]
    fn test_purchase_credits_from_product_id() {
        let purchase = Purchase::new("txn", "acct", "10Tokens", Utc::now());
        assert_eq!(purchase.credits(), dec!(10));
    }

    #[test]
    fn test_purchase_credits_fractional() {
        let purchase = Purchase::new("txn", "acct", "2.5Tokens", Utc::now());
        assert_eq!(purchase.credits(), dec!(2.5));
    }

    #[test]
    fn test_unparseable_product_id_grants_nothing() {
        let purchase = Purchase::new("txn", "acct", "premium_monthly", Utc::now());
        assert_eq!(purchase.credits(), Decimal::ZERO);
    }
}
