//! Wire format for transactions travelling through the broker.
//!
//! The payload is a JSON object keyed by field name. Timestamps and amounts are
//! rendered as strings so the textual round trip is lossless.


use thiserror::Error;

use crate::models::Transaction;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Failed to encode transaction [{transaction_id}]: {reason}")]
    Encode {
        transaction_id: String,
        reason: String
    }
}

pub fn serialize(transaction: &Transaction) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(transaction).map_err(|error| CodecError::Encode {
        transaction_id: transaction.transaction_id.clone(),
        reason: error.to_string()
    })
}

pub fn deserialize(payload: &[u8]) -> Result<Transaction, CodecError> {
    let transaction: Transaction = serde_json::from_slice(payload)
        .map_err(|error| CodecError::MalformedPayload(error.to_string()))?;

    transaction.validate()
        .map_err(|error| CodecError::MalformedPayload(error.to_string()))?;

    Ok(transaction)
}
