use crate::types::AmountError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Unknown currency [{0}]")]
    UnknownCurrency(String),
    #[error("Unknown payment method [{0}]")]
    UnknownPaymentMethod(String),
    #[error("Invalid IPv4 address [{0}]")]
    InvalidIpAddress(String),
    #[error("Transaction id must not be empty")]
    EmptyTransactionId,
    #[error(transparent)]
    Amount(#[from] AmountError)
}
