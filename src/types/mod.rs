mod amount;
mod errors;
#[cfg(test)]
mod tests;

pub use amount::Amount;
pub use errors::AmountError;

pub type TransactionId = String;
pub type UserId = String;
