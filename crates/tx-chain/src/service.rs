//! Boundary to the node/wallet service that holds keys, serializes, signs,
//! relays and mines.

use async_trait::async_trait;
use bitcoin::{Amount, BlockHash, Txid};
use chain_btc::{Address, ScriptKind, UnsignedTransaction, UnspentOutput};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Bitcoin Core: requested wallet does not exist or is not loaded.
pub const RPC_WALLET_NOT_FOUND: i64 = -18;

/// Bitcoin Core: this wallet is already loaded.
pub const RPC_WALLET_ALREADY_LOADED: i64 = -35;

/// Failures reported by, or while talking to, the wallet service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ServiceError {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        ServiceError::Rpc {
            code,
            message: message.into(),
        }
    }

    /// RPC error code, if the service answered with one.
    pub fn code(&self) -> Option<i64> {
        match self {
            ServiceError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// How [`WalletService::ensure_wallet`] obtained the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalletStatus {
    /// Loaded from disk by this call.
    Loaded,
    /// Already loaded in the node before this call.
    AlreadyLoaded,
    /// Did not exist and was created by this call.
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletHandle {
    pub name: String,
    pub status: WalletStatus,
}

/// Result of asking the wallet to sign a serialized transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hex: String,
    /// False when at least one input could not be signed.
    pub complete: bool,
    /// Per-input signing errors reported alongside an incomplete signature.
    pub errors: Vec<String>,
}

/// Unlocking script of a decoded input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSig {
    pub asm: String,
    pub hex: String,
}

/// Locking script of a decoded output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    pub asm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub script_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInput {
    pub txid: Txid,
    pub vout: u32,
    #[serde(rename = "scriptSig")]
    pub script_sig: ScriptSig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txinwitness: Option<Vec<String>>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedOutput {
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub value: Amount,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

/// Structured view of a serialized transaction, as `decoderawtransaction` reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTransaction {
    pub txid: Txid,
    pub hash: String,
    pub version: i32,
    pub size: u64,
    pub vsize: u64,
    pub weight: u64,
    pub locktime: u32,
    pub vin: Vec<DecodedInput>,
    pub vout: Vec<DecodedOutput>,
}

impl DecodedTransaction {
    /// First output paying to `address`.
    pub fn output_to(&self, address: &str) -> Option<&DecodedOutput> {
        self.vout
            .iter()
            .find(|o| o.script_pub_key.address.as_deref() == Some(address))
    }

    pub fn total_output(&self) -> Amount {
        self.vout.iter().map(|o| o.value).sum()
    }
}

/// Operations the pipeline needs from a node/wallet.
///
/// Every method is a suspension point; callers await them strictly in order.
#[async_trait]
pub trait WalletService: Send + Sync {
    async fn load_wallet(&self, name: &str) -> Result<(), ServiceError>;

    async fn create_wallet(&self, name: &str) -> Result<(), ServiceError>;

    /// Load `name`, creating it only when the node reports it does not exist.
    ///
    /// Safe to call repeatedly: an already loaded wallet is reported as such.
    /// Any load failure other than "not found" is returned unchanged.
    async fn ensure_wallet(&self, name: &str) -> Result<WalletHandle, ServiceError> {
        let status = match self.load_wallet(name).await {
            Ok(()) => WalletStatus::Loaded,
            Err(e) if e.code() == Some(RPC_WALLET_ALREADY_LOADED) => WalletStatus::AlreadyLoaded,
            Err(e) if e.code() == Some(RPC_WALLET_NOT_FOUND) => {
                debug!(wallet = name, "wallet not found, creating");
                self.create_wallet(name).await?;
                WalletStatus::Created
            }
            Err(e) => return Err(e),
        };
        info!(wallet = name, ?status, "wallet ready");
        Ok(WalletHandle {
            name: name.to_string(),
            status,
        })
    }

    async fn new_address(&self, kind: ScriptKind) -> Result<Address, ServiceError>;

    /// Pay `amount` to `destination` from the wallet's own funds.
    async fn pay(&self, destination: &Address, amount: Amount) -> Result<Txid, ServiceError>;

    /// Mine `block_count` blocks paying the reward to `reward`.
    async fn confirm(
        &self,
        block_count: u32,
        reward: &Address,
    ) -> Result<Vec<BlockHash>, ServiceError>;

    /// Confirmations of a wallet transaction; zero while unconfirmed.
    async fn confirmations(&self, txid: &Txid) -> Result<u32, ServiceError>;

    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[Address],
    ) -> Result<Vec<UnspentOutput>, ServiceError>;

    /// Serialize an unsigned transaction to hex.
    async fn build_unsigned(&self, tx: &UnsignedTransaction) -> Result<String, ServiceError>;

    async fn decode(&self, hex: &str) -> Result<DecodedTransaction, ServiceError>;

    async fn sign(&self, hex: &str) -> Result<SignedTransaction, ServiceError>;

    /// Submit a signed transaction to the network.
    async fn relay(&self, hex: &str) -> Result<Txid, ServiceError>;
}
