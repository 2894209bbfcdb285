use bitcoin::{Amount, Txid};
use chain_btc::ScriptKind;
use serde::{Deserialize, Serialize};

use crate::service::DecodedTransaction;

/// One transfer in the chain: `source` pays `amount` to `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    pub source: String,
    pub destination: String,
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub amount: Amount,
    /// Fee actually paid, including change forfeited as dust.
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub fee: Amount,
    pub txid: Txid,
    pub unsigned_hex: String,
    /// Signed transaction as relayed.
    pub raw_hex: String,
    /// Decoding of `raw_hex`.
    pub decoded_transaction: DecodedTransaction,
}

/// Audit record of a completed chain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionChainRecord {
    pub script_kind: ScriptKind,
    /// Generated addresses in chain order: the funded address first.
    pub addresses: Vec<String>,
    pub funding_txid: Txid,
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub funding_amount: Amount,
    pub hops: Vec<Hop>,
}

impl TransactionChainRecord {
    /// Txids in broadcast order, funding first.
    pub fn txids(&self) -> Vec<Txid> {
        std::iter::once(self.funding_txid)
            .chain(self.hops.iter().map(|h| h.txid))
            .collect()
    }
}
