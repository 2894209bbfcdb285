use std::sync::Arc;

use bitcoin::Amount;
use chain_btc::{Address, BtcError, FeePolicy, SelectAll, SelectionStrategy, UnspentOutput};
use tracing::{debug, warn};

use crate::error::TxChainError;
use crate::service::WalletService;

/// Confirmation window for eligible outputs, as passed to `listunspent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationWindow {
    pub min: u32,
    pub max: u32,
}

impl Default for ConfirmationWindow {
    fn default() -> Self {
        Self {
            min: 1,
            max: 9_999_999,
        }
    }
}

/// Fetches an address's spendable outputs and applies a selection strategy.
///
/// Nothing is cached: every call asks the wallet again, so spent outputs are
/// never offered twice.
pub struct UtxoSelector {
    service: Arc<dyn WalletService>,
    strategy: Arc<dyn SelectionStrategy>,
    window: ConfirmationWindow,
}

impl UtxoSelector {
    pub fn new(service: Arc<dyn WalletService>, window: ConfirmationWindow) -> Self {
        Self {
            service,
            strategy: Arc::new(SelectAll),
            window,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Outputs of `address` chosen to fund a payment of `target`.
    ///
    /// Fails with `NoFundsAvailable` when the wallet reports nothing eligible.
    pub async fn select(
        &self,
        address: &Address,
        target: Amount,
        policy: &FeePolicy,
    ) -> Result<Vec<UnspentOutput>, TxChainError> {
        let listed = self
            .service
            .list_unspent(self.window.min, self.window.max, std::slice::from_ref(address))
            .await?;

        let (owned, foreign): (Vec<_>, Vec<_>) = listed
            .into_iter()
            .partition(|u| u.address == address.as_str());
        for utxo in &foreign {
            warn!(
                requested = %address,
                owner = %utxo.address,
                outpoint = %utxo.outpoint(),
                "ignoring output owned by another address"
            );
        }

        if owned.is_empty() {
            return Err(BtcError::NoFundsAvailable(address.to_string()).into());
        }

        let selected = self.strategy.select(owned, target, policy)?;
        debug!(
            address = %address,
            strategy = self.strategy.name(),
            count = selected.len(),
            total = %chain_btc::utxo::total_amount(&selected),
            "selected outputs"
        );
        Ok(selected)
    }
}
