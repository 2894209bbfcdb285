use bitcoin::{Amount, OutPoint, Txid};
use serde::{Deserialize, Serialize};

use crate::error::BtcError;
use crate::fee::FeePolicy;

/// A single unspent transaction output (UTXO).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    /// Transaction that created the output.
    pub txid: Txid,
    /// Output index within that transaction.
    pub vout: u32,
    /// Value of the output.
    pub amount: Amount,
    /// Address the output pays to.
    pub address: String,
    /// Confirmations reported by the wallet at listing time.
    pub confirmations: u32,
}

impl UnspentOutput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

/// Sum the value of a set of outputs.
pub fn total_amount(utxos: &[UnspentOutput]) -> Amount {
    utxos.iter().map(|u| u.amount).sum()
}

/// Chooses which of an address's eligible outputs fund a payment.
///
/// `target` is the total of the requested outputs, without fee. Strategies
/// that stop early must still cover `target` plus the fee `policy` charges for
/// the resulting input count.
pub trait SelectionStrategy: Send + Sync {
    fn select(
        &self,
        candidates: Vec<UnspentOutput>,
        target: Amount,
        policy: &FeePolicy,
    ) -> Result<Vec<UnspentOutput>, BtcError>;

    fn name(&self) -> &'static str;
}

/// Spend every eligible output.
///
/// Sufficiency is checked later by the change calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAll;

impl SelectionStrategy for SelectAll {
    fn select(
        &self,
        candidates: Vec<UnspentOutput>,
        _target: Amount,
        _policy: &FeePolicy,
    ) -> Result<Vec<UnspentOutput>, BtcError> {
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "select-all"
    }
}

/// Accumulate outputs in descending value order until `target + fee` is covered.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestFirst;

impl SelectionStrategy for LargestFirst {
    fn select(
        &self,
        mut candidates: Vec<UnspentOutput>,
        target: Amount,
        policy: &FeePolicy,
    ) -> Result<Vec<UnspentOutput>, BtcError> {
        candidates.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut selected = Vec::new();
        let mut total = Amount::ZERO;

        for utxo in candidates {
            total += utxo.amount;
            selected.push(utxo);

            // Two outputs: payment + change.
            let fee = policy.fee_for(selected.len(), 2);
            if total >= target + fee {
                return Ok(selected);
            }
        }

        let fee = policy.fee_for(selected.len(), 2);
        Err(BtcError::InsufficientFunds {
            available: total,
            required: target + fee,
            requested: target,
            fee,
        })
    }

    fn name(&self) -> &'static str {
        "largest-first"
    }
}
