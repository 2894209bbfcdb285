use std::collections::HashSet;

use bitcoin::{Amount, OutPoint, Txid};
use serde::{Deserialize, Serialize};

use crate::error::BtcError;
use crate::utxo::UnspentOutput;

/// A payment of `amount` to `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutput {
    pub address: String,
    pub amount: Amount,
}

impl PaymentOutput {
    pub fn new(address: impl Into<String>, amount: Amount) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

/// Destinations and amounts a transaction must pay, in output order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentRequest {
    outputs: Vec<PaymentOutput>,
}

impl PaymentRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(address: impl Into<String>, amount: Amount) -> Self {
        Self::new().pay(address, amount)
    }

    /// Add a destination. Validation is deferred to [`PaymentRequest::validate`].
    pub fn pay(mut self, address: impl Into<String>, amount: Amount) -> Self {
        self.outputs.push(PaymentOutput::new(address, amount));
        self
    }

    pub fn outputs(&self) -> &[PaymentOutput] {
        &self.outputs
    }

    pub fn total(&self) -> Amount {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Require at least one destination, positive amounts and no repeated address.
    pub fn validate(&self) -> Result<(), BtcError> {
        validate_outputs(&self.outputs)
    }
}

/// Reference to an output being spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputRef {
    pub txid: Txid,
    pub vout: u32,
}

impl From<&UnspentOutput> for InputRef {
    fn from(utxo: &UnspentOutput) -> Self {
        Self {
            txid: utxo.txid,
            vout: utxo.vout,
        }
    }
}

impl From<InputRef> for OutPoint {
    fn from(input: InputRef) -> Self {
        OutPoint::new(input.txid, input.vout)
    }
}

/// Inputs and outputs of a transaction, before the service serializes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub inputs: Vec<InputRef>,
    pub outputs: Vec<PaymentOutput>,
}

impl UnsignedTransaction {
    pub fn total_output(&self) -> Amount {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// Assemble an unsigned transaction spending `inputs` into `outputs`.
///
/// Only the shape is checked: at least one input and one output, no outpoint
/// spent twice, no destination repeated and no zero-value output. Amount
/// sufficiency is the change calculator's job.
pub fn build(
    inputs: &[UnspentOutput],
    outputs: Vec<PaymentOutput>,
) -> Result<UnsignedTransaction, BtcError> {
    if inputs.is_empty() {
        return Err(BtcError::MalformedRequest("transaction has no inputs".into()));
    }
    validate_outputs(&outputs)?;

    let mut seen = HashSet::with_capacity(inputs.len());
    let mut refs = Vec::with_capacity(inputs.len());
    for utxo in inputs {
        let input = InputRef::from(utxo);
        if !seen.insert(input) {
            return Err(BtcError::MalformedRequest(format!(
                "outpoint {}:{} spent twice",
                input.txid, input.vout
            )));
        }
        refs.push(input);
    }

    Ok(UnsignedTransaction {
        inputs: refs,
        outputs,
    })
}

fn validate_outputs(outputs: &[PaymentOutput]) -> Result<(), BtcError> {
    if outputs.is_empty() {
        return Err(BtcError::MalformedRequest("transaction has no outputs".into()));
    }

    let mut seen = HashSet::with_capacity(outputs.len());
    for output in outputs {
        if output.amount == Amount::ZERO {
            return Err(BtcError::MalformedRequest(format!(
                "zero-value output to {}",
                output.address
            )));
        }
        if !seen.insert(output.address.as_str()) {
            return Err(BtcError::MalformedRequest(format!(
                "duplicate output address {}",
                output.address
            )));
        }
    }
    Ok(())
}
