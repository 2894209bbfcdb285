use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bitcoin::Txid;
use chain_btc::BtcError;
use thiserror::Error;

use crate::service::ServiceError;

/// Everything that can stop a chain run.
#[derive(Debug, Error)]
pub enum TxChainError {
    #[error("wallet {wallet} unavailable: {source}")]
    WalletUnavailable {
        wallet: String,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Btc(#[from] BtcError),

    #[error("signing incomplete: {}", errors.join("; "))]
    SigningIncomplete { errors: Vec<String> },

    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("broadcast rejected{}: {message}", code.map(|c| format!(" ({c})")).unwrap_or_default())]
    BroadcastRejected { code: Option<i64>, message: String },

    #[error("transaction {txid} not confirmed after {waited:?}{}", last_error.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default())]
    ConfirmationTimeout {
        txid: Txid,
        waited: Duration,
        last_error: Option<String>,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("wallet returned address {0} more than once")]
    DuplicateAddress(String),

    #[error("failed to write {}: {source}", path.display())]
    Record {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,
}

impl From<::config::ConfigError> for TxChainError {
    fn from(e: ::config::ConfigError) -> Self {
        TxChainError::Config(e.to_string())
    }
}

/// Step of a chain run at which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WalletSetup,
    Addresses,
    Fund,
    Confirm,
    Select,
    Change,
    Build,
    Decode,
    Sign,
    Broadcast,
    Record,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::WalletSetup => "wallet setup",
            Stage::Addresses => "address generation",
            Stage::Fund => "funding",
            Stage::Confirm => "confirmation",
            Stage::Select => "utxo selection",
            Stage::Change => "change computation",
            Stage::Build => "build",
            Stage::Decode => "decode",
            Stage::Sign => "sign",
            Stage::Broadcast => "broadcast",
            Stage::Record => "record",
        };
        f.write_str(name)
    }
}

/// Why a chain run was aborted: where it failed and the underlying cause.
#[derive(Debug, Error)]
pub struct ChainError {
    /// Index of the failing hop; `None` for steps outside the hop loop.
    pub hop: Option<usize>,
    pub stage: Stage,
    #[source]
    pub source: TxChainError,
}

impl ChainError {
    pub fn new(hop: Option<usize>, stage: Stage, source: TxChainError) -> Self {
        Self { hop, stage, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, TxChainError::Cancelled)
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hop {
            Some(hop) => write!(f, "hop {hop} failed at {}: {}", self.stage, self.source),
            None => write!(f, "chain failed at {}: {}", self.stage, self.source),
        }
    }
}
