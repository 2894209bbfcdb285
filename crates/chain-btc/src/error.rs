use bitcoin::Amount;
use thiserror::Error;

/// Errors raised while selecting, pricing and assembling a transaction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BtcError {
    #[error("no spendable outputs for address {0}")]
    NoFundsAvailable(String),

    #[error("insufficient funds: have {available}, need {required} (outputs {requested} + fee {fee})")]
    InsufficientFunds {
        available: Amount,
        required: Amount,
        requested: Amount,
        fee: Amount,
    },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}
