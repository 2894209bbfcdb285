use std::sync::Arc;

use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::{Transaction, Txid};
use tracing::{debug, info, warn};

use crate::error::TxChainError;
use crate::service::{ServiceError, SignedTransaction, WalletService};

/// Signs through the wallet and relays through the node.
pub struct Signer {
    service: Arc<dyn WalletService>,
}

impl Signer {
    pub fn new(service: Arc<dyn WalletService>) -> Self {
        Self { service }
    }

    /// Sign `unsigned_hex` with the wallet's keys.
    ///
    /// An incomplete signature is an error; it is never handed back for relay.
    pub async fn sign(&self, unsigned_hex: &str) -> Result<SignedTransaction, TxChainError> {
        let signed = self.service.sign(unsigned_hex).await.map_err(|e| match e {
            ServiceError::Rpc { .. } => TxChainError::SigningError(e.to_string()),
            other => TxChainError::Service(other),
        })?;

        if !signed.complete {
            warn!(errors = ?signed.errors, "wallet could not sign every input");
            return Err(TxChainError::SigningIncomplete {
                errors: signed.errors,
            });
        }

        let tx: Transaction = deserialize_hex(&signed.hex).map_err(|e| {
            TxChainError::SigningError(format!("wallet returned an undecodable transaction: {e}"))
        })?;
        debug!(inputs = tx.input.len(), outputs = tx.output.len(), "transaction signed");

        Ok(signed)
    }

    /// Relay a fully signed transaction and return its txid.
    pub async fn broadcast(&self, signed: &SignedTransaction) -> Result<Txid, TxChainError> {
        if !signed.complete {
            return Err(TxChainError::SigningIncomplete {
                errors: signed.errors.clone(),
            });
        }

        let txid = self.service.relay(&signed.hex).await.map_err(|e| match e {
            ServiceError::Rpc { code, message } => TxChainError::BroadcastRejected {
                code: Some(code),
                message,
            },
            other => TxChainError::Service(other),
        })?;

        info!(%txid, "transaction broadcast");
        Ok(txid)
    }
}
