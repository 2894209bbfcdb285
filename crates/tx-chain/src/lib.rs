//! Transaction-chain runner for a Bitcoin Core compatible node.
//!
//! Funds a fresh address, then moves the coins through a chain of addresses
//! one hop at a time, confirming each hop before spending its output, and
//! records every transaction for audit.

pub mod config;
pub mod confirm;
pub mod error;
pub mod orchestrator;
pub mod record;
pub mod recorder;
pub mod rpc;
pub mod selector;
pub mod service;
pub mod signer;

pub use crate::config::Settings;
pub use confirm::{Confirmation, ConfirmationMode, Confirmer};
pub use error::{ChainError, Stage, TxChainError};
pub use orchestrator::{ChainOrchestrator, ChainPlan, ChainState, CompletedChain};
pub use record::{Hop, TransactionChainRecord};
pub use recorder::{PersistedArtifact, Recorder};
pub use rpc::BitcoindRpc;
pub use selector::{ConfirmationWindow, UtxoSelector};
pub use service::{DecodedTransaction, ServiceError, SignedTransaction, WalletService};
pub use signer::Signer;
