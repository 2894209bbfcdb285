//! Bitcoin transaction construction primitives for the hop chain.
//!
//! Provides script-kind tagged addresses, UTXO selection strategies, the fixed
//! fee and change calculator, and the unsigned transaction builder. Nothing in
//! this crate talks to a node; serialization, signing and relay are left to
//! the wallet service.

pub mod address;
pub mod error;
pub mod fee;
pub mod network;
pub mod transaction;
pub mod utxo;

pub use address::{Address, ScriptKind};
pub use error::BtcError;
pub use fee::{compute_change, ChangePlan, FeePolicy};
pub use network::BtcNetwork;
pub use transaction::{build, InputRef, PaymentOutput, PaymentRequest, UnsignedTransaction};
pub use utxo::{LargestFirst, SelectAll, SelectionStrategy, UnspentOutput};
