use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Currency, ModelError, PaymentMethod};
use crate::types::{Amount, TransactionId, UserId};

/// A single financial transaction as it moves from the source table, through
/// the broker, into the sink table.
///
/// Records are created once upstream and never modified afterwards. The field
/// names double as the wire payload keys and the CSV header names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique id, the idempotency key at the sink.
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    /// Creation time in UTC.
    pub timestamp: DateTime<Utc>,
    pub amount: Amount,
    pub currency: Currency,
    pub city: String,
    pub country: String,
    pub merchant_name: String,
    pub payment_method: PaymentMethod,
    pub ip_address: Ipv4Addr,
    /// Empty when no voucher was applied.
    #[serde(default)]
    pub voucher_code: String,
    pub affiliate_id: String
}

impl Transaction {
    /// Checks the invariants that the type system alone does not cover.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.transaction_id.trim().is_empty() {
            return Err(ModelError::EmptyTransactionId);
        }

        Ok(())
    }
}
