use std::sync::Arc;
use std::time::Duration;

use bitcoin::{BlockHash, Txid};
use chain_btc::ScriptKind;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::TxChainError;
use crate::service::WalletService;

/// How a transaction is brought to (or observed at) one confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationMode {
    /// Mine blocks on demand. Only meaningful on regtest.
    Mine {
        blocks: u32,
        /// Extra attempts after a failed mining call.
        retries: u32,
        backoff: Duration,
    },
    /// Watch the transaction until it confirms or `timeout` elapses.
    Poll { interval: Duration, timeout: Duration },
}

impl Default for ConfirmationMode {
    fn default() -> Self {
        ConfirmationMode::Mine {
            blocks: 1,
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Evidence that a transaction confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Mined { blocks: Vec<BlockHash> },
    Observed { confirmations: u32 },
}

pub struct Confirmer {
    service: Arc<dyn WalletService>,
    mode: ConfirmationMode,
}

impl Confirmer {
    pub fn new(service: Arc<dyn WalletService>, mode: ConfirmationMode) -> Self {
        Self { service, mode }
    }

    pub fn mode(&self) -> &ConfirmationMode {
        &self.mode
    }

    /// Return once `txid` has at least one confirmation.
    pub async fn await_confirmation(&self, txid: &Txid) -> Result<Confirmation, TxChainError> {
        match &self.mode {
            ConfirmationMode::Mine {
                blocks,
                retries,
                backoff,
            } => self.mine(txid, *blocks, *retries, *backoff).await,
            ConfirmationMode::Poll { interval, timeout } => {
                self.poll(txid, *interval, *timeout).await
            }
        }
    }

    async fn mine(
        &self,
        txid: &Txid,
        blocks: u32,
        retries: u32,
        backoff: Duration,
    ) -> Result<Confirmation, TxChainError> {
        let mut attempt = 0;
        loop {
            let result = async {
                let reward = self.service.new_address(ScriptKind::Legacy).await?;
                self.service.confirm(blocks, &reward).await
            }
            .await;

            match result {
                Ok(hashes) => {
                    info!(%txid, blocks = hashes.len(), "mined confirming blocks");
                    return Ok(Confirmation::Mined { blocks: hashes });
                }
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(%txid, attempt, error = %e, "mining failed, retrying");
                    sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn poll(
        &self,
        txid: &Txid,
        interval: Duration,
        limit: Duration,
    ) -> Result<Confirmation, TxChainError> {
        let started = Instant::now();
        let mut last_error = None;

        let watch = async {
            loop {
                match self.service.confirmations(txid).await {
                    Ok(confirmations) if confirmations >= 1 => return confirmations,
                    Ok(_) => debug!(%txid, "not yet confirmed"),
                    Err(e) => {
                        warn!(%txid, error = %e, "confirmation lookup failed");
                        last_error = Some(e.to_string());
                    }
                }
                sleep(interval).await;
            }
        };

        let outcome = timeout(limit, watch).await;
        match outcome {
            Ok(confirmations) => {
                info!(%txid, confirmations, "transaction confirmed");
                Ok(Confirmation::Observed { confirmations })
            }
            Err(_) => Err(TxChainError::ConfirmationTimeout {
                txid: *txid,
                waited: started.elapsed(),
                last_error,
            }),
        }
    }
}
