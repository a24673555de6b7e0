//! Alias reconciliation into canonical accounts.
//!
//! Externally-issued aliases arrive in sets (current id, original id, linked
//! ids). Reconciliation is the single entry point that turns such a set into
//! one canonical account, merging split-brain accounts whenever alias sets
//! are proven to intersect.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::store::{Account, Store};
use crate::{Error, Result};

/// Reconciles incoming alias sets into canonical accounts.
#[derive(Debug)]
pub struct IdentityMerger {
    store: Arc<dyn Store>,
    // serializes whole reconcile operations; two concurrent merges over
    // intersecting alias sets could otherwise double-credit or double-delete
    merge_lock: Mutex<()>,
}

impl IdentityMerger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            merge_lock: Mutex::new(()),
        }
    }

    /// Resolve an incoming alias set to its canonical account, creating or
    /// merging as needed. Idempotent: feeding the result's aliases back in
    /// returns the same account.
    pub async fn reconcile(&self, aliases: &[String]) -> Result<Account> {
        let Some(primary) = aliases.first() else {
            return Err(Error::InvalidRequest("empty alias set".into()));
        };

        let _guard = self.merge_lock.lock().await;
        let mut matches = self.store.find_accounts_by_aliases(aliases).await?;
        match matches.len() {
            0 => {
                let account = Account::new(primary.clone(), aliases.to_vec());
                self.store.save_account(&account).await?;
                info!(account_id = %account.id, "created account for unknown aliases");
                Ok(account)
            }
            1 => {
                let mut account = matches.remove(0);
                if account.absorb_aliases(aliases.to_vec()) {
                    self.store.save_account(&account).await?;
                    debug!(account_id = %account.id, aliases = account.aliases.len(), "extended alias set");
                }
                Ok(account)
            }
            _ => self.merge(matches, aliases).await,
        }
    }

    /// Collapse independently created accounts proven to be the same payer.
    ///
    /// Survivor election is deterministic (smallest id) so any grouping of
    /// the same accounts converges on the same outcome. Commit goes through
    /// the store's atomic merge boundary.
    async fn merge(&self, matches: Vec<Account>, incoming: &[String]) -> Result<Account> {
        // find_accounts_by_aliases returns id-sorted matches; first is the survivor
        let mut matches = matches.into_iter();
        let Some(mut survivor) = matches.next() else {
            return Err(Error::InvalidRequest("merge requires at least one account".into()));
        };

        let mut absorbed = Vec::new();
        for account in matches {
            survivor.used_credits += account.used_credits;
            survivor.absorb_aliases(account.aliases);
            absorbed.push(account.id);
        }
        survivor.absorb_aliases(incoming.to_vec());

        info!(
            survivor = %survivor.id,
            absorbed = ?absorbed,
            used_credits = %survivor.used_credits,
            "merged split-brain accounts"
        );
        self.store.merge_accounts(&survivor, &absorbed).await?;
        Ok(survivor)
    }
}
