use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::error::BtcError;
use crate::transaction::{PaymentOutput, PaymentRequest};
use crate::utxo::{total_amount, UnspentOutput};

/// Flat fee charged per transaction: 0.0001 BTC.
pub const DEFAULT_FEE: Amount = Amount::from_sat(10_000);

/// Smallest change worth its own output: 0.00001 BTC.
pub const DEFAULT_DUST_THRESHOLD: Amount = Amount::from_sat(1_000);

/// Fee and dust policy applied to every transaction in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub fee: Amount,
    pub dust_threshold: Amount,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee: DEFAULT_FEE,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
        }
    }
}

impl FeePolicy {
    pub fn new(fee: Amount, dust_threshold: Amount) -> Self {
        Self { fee, dust_threshold }
    }

    /// Fee for a transaction of the given shape. Flat: the shape is ignored.
    pub fn fee_for(&self, _num_inputs: usize, _num_outputs: usize) -> Amount {
        self.fee
    }
}

/// Outcome of the change computation for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePlan {
    pub total_input: Amount,
    pub total_requested: Amount,
    pub fee: Amount,
    /// `total_input - total_requested - fee`.
    pub change: Amount,
    /// Whether `change` was paid back as an output. When false it is forfeited to the fee.
    pub change_emitted: bool,
    /// Requested outputs, followed by the change output if one was emitted.
    pub outputs: Vec<PaymentOutput>,
}

impl ChangePlan {
    /// Change that was too small to emit and went to the miner.
    pub fn forfeited(&self) -> Amount {
        if self.change_emitted {
            Amount::ZERO
        } else {
            self.change
        }
    }

    /// Fee actually paid: the policy fee plus any forfeited dust.
    pub fn effective_fee(&self) -> Amount {
        self.fee + self.forfeited()
    }

    pub fn total_output(&self) -> Amount {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// Work out the change for spending `inputs` on `requested`, paying change to `change_address`.
///
/// Fails with `InsufficientFunds` before anything is built when the inputs
/// cannot cover the requested outputs plus the fee.
pub fn compute_change(
    inputs: &[UnspentOutput],
    requested: &PaymentRequest,
    change_address: &str,
    policy: &FeePolicy,
) -> Result<ChangePlan, BtcError> {
    requested.validate()?;

    let total_input = total_amount(inputs);
    let total_requested = requested.total();
    let mut outputs = requested.outputs().to_vec();

    // One extra output when change is emitted; irrelevant for a flat fee.
    let fee = policy.fee_for(inputs.len(), outputs.len() + 1);
    let required = total_requested
        .checked_add(fee)
        .ok_or_else(|| BtcError::InvalidAmount("requested total overflows".into()))?;

    let change = total_input
        .checked_sub(required)
        .ok_or(BtcError::InsufficientFunds {
            available: total_input,
            required,
            requested: total_requested,
            fee,
        })?;

    let change_emitted = change >= policy.dust_threshold;
    if change_emitted {
        match outputs.iter_mut().find(|o| o.address == change_address) {
            Some(existing) => existing.amount += change,
            None => outputs.push(PaymentOutput::new(change_address, change)),
        }
    }

    Ok(ChangePlan {
        total_input,
        total_requested,
        fee,
        change,
        change_emitted,
        outputs,
    })
}
