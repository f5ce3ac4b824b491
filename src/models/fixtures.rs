use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{TimeZone, Utc};

use crate::models::{Currency, PaymentMethod, Transaction};
use crate::types::Amount;

/// A fully populated transaction with a fixed timestamp, keyed by `transaction_id`.
pub fn transaction(transaction_id: &str) -> Transaction {
    Transaction {
        transaction_id: transaction_id.to_string(),
        user_id: "jdoe".to_string(),
        timestamp: Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).single().unwrap_or_default(),
        amount: Amount::from_str("250.75").unwrap(),
        currency: Currency::Eur,
        city: "Lyon".to_string(),
        country: "France".to_string(),
        merchant_name: "Boulangerie Martin".to_string(),
        payment_method: PaymentMethod::CreditCard,
        ip_address: Ipv4Addr::new(192, 168, 10, 42),
        voucher_code: String::new(),
        affiliate_id: "aff-001".to_string()
    }
}

/// Same id as [`transaction`] but with different field values, as a later
/// conflicting delivery would carry.
pub fn conflicting_version(transaction_id: &str) -> Transaction {
    Transaction {
        amount: Amount::from_str("9.99").unwrap(),
        currency: Currency::Usd,
        voucher_code: "DISCOUNT10".to_string(),
        ..transaction(transaction_id)
    }
}
