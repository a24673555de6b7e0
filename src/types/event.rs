//! Purchase-confirmation events from the payment provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed purchase as distilled from the provider webhook.
///
/// `aliases` carries every identifier the provider knows for the payer
/// (current id, original id, linked ids); the identity merger folds them into
/// one canonical account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub aliases: Vec<String>,
    pub product_id: String,
    pub transaction_id: String,
    pub purchased_at_ms: i64,
}

impl PurchaseEvent {
    /// Purchase timestamp; out-of-range epoch millis clamp to the minimum
    /// representable instant rather than failing the event.
    pub fn purchased_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.purchased_at_ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
