use std::sync::Arc;
use std::time::Duration;

use bitcoin::Amount;
use chain_btc::{
    BtcNetwork, FeePolicy, LargestFirst, ScriptKind, SelectAll, SelectionStrategy,
};
use ::config::{Config, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::Deserialize;

use crate::confirm::ConfirmationMode;
use crate::error::TxChainError;
use crate::orchestrator::ChainPlan;
use crate::selector::ConfirmationWindow;

/// Runner configuration, read from TOML and `TXCHAIN__*` environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub rpc: RpcSettings,
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub fee: FeeSettings,
    #[serde(default)]
    pub confirmation: ConfirmationSettings,
    #[serde(default = "default_runs")]
    pub runs: Vec<RunSettings>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RpcSettings {
    pub url: String,
    pub user: String,
    pub password: SecretString,
    #[serde(default)]
    pub network: BtcNetwork,
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    pub wallet: String,
    pub data_dir: String,
    pub min_confirmations: u32,
    pub max_confirmations: u32,
    pub selection: SelectionKind,
}

/// UTXO selection strategy for each hop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionKind {
    #[default]
    SelectAll,
    LargestFirst,
}

impl Default for ChainSettings {
    fn default() -> Self {
        let window = ConfirmationWindow::default();
        Self {
            wallet: "test-wallet".to_string(),
            data_dir: "data".to_string(),
            min_confirmations: window.min,
            max_confirmations: window.max,
            selection: SelectionKind::SelectAll,
        }
    }
}

impl ChainSettings {
    pub fn window(&self) -> ConfirmationWindow {
        ConfirmationWindow {
            min: self.min_confirmations,
            max: self.max_confirmations,
        }
    }

    pub fn strategy(&self) -> Arc<dyn SelectionStrategy> {
        match self.selection {
            SelectionKind::SelectAll => Arc::new(SelectAll),
            SelectionKind::LargestFirst => Arc::new(LargestFirst),
        }
    }
}

/// Fee and dust threshold in BTC.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FeeSettings {
    pub fee: f64,
    pub dust_threshold: f64,
}

impl Default for FeeSettings {
    fn default() -> Self {
        let policy = FeePolicy::default();
        Self {
            fee: policy.fee.to_btc(),
            dust_threshold: policy.dust_threshold.to_btc(),
        }
    }
}

impl FeeSettings {
    pub fn policy(&self) -> Result<FeePolicy, TxChainError> {
        let fee = btc_amount("fee.fee", self.fee, true)?;
        let dust = btc_amount("fee.dust_threshold", self.dust_threshold, true)?;
        Ok(FeePolicy::new(fee, dust))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationKind {
    #[default]
    Mine,
    Poll,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConfirmationSettings {
    pub mode: ConfirmationKind,
    pub blocks: u32,
    pub retries: u32,
    pub backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            mode: ConfirmationKind::Mine,
            blocks: 1,
            retries: 2,
            backoff_ms: 500,
            poll_interval_ms: 1_000,
            timeout_secs: 600,
        }
    }
}

impl ConfirmationSettings {
    pub fn mode(&self) -> Result<ConfirmationMode, TxChainError> {
        match self.mode {
            ConfirmationKind::Mine => {
                if self.blocks == 0 {
                    return Err(TxChainError::Config(
                        "confirmation.blocks must be at least 1".into(),
                    ));
                }
                Ok(ConfirmationMode::Mine {
                    blocks: self.blocks,
                    retries: self.retries,
                    backoff: Duration::from_millis(self.backoff_ms),
                })
            }
            ConfirmationKind::Poll => {
                if self.timeout_secs == 0 {
                    return Err(TxChainError::Config(
                        "confirmation.timeout_secs must be positive".into(),
                    ));
                }
                Ok(ConfirmationMode::Poll {
                    interval: Duration::from_millis(self.poll_interval_ms),
                    timeout: Duration::from_secs(self.timeout_secs),
                })
            }
        }
    }
}

/// One chain run: a funding amount and the amount paid at each hop, in BTC.
#[derive(Clone, Debug, Deserialize)]
pub struct RunSettings {
    pub name: String,
    pub script_kind: ScriptKind,
    #[serde(default = "default_funding_amount")]
    pub funding_amount: f64,
    pub hops: Vec<f64>,
    pub output_file: String,
}

fn default_rpc_timeout() -> u64 {
    30
}

fn default_funding_amount() -> f64 {
    1.0
}

fn default_runs() -> Vec<RunSettings> {
    vec![
        RunSettings {
            name: "legacy".into(),
            script_kind: ScriptKind::Legacy,
            funding_amount: 1.0,
            hops: vec![0.5, 0.2],
            output_file: "legacy-transactions.json".into(),
        },
        RunSettings {
            name: "segwit".into(),
            script_kind: ScriptKind::P2shSegwit,
            funding_amount: 1.0,
            hops: vec![0.5, 0.25],
            output_file: "segwit-transactions.json".into(),
        },
    ]
}

fn btc_amount(field: &str, btc: f64, allow_zero: bool) -> Result<Amount, TxChainError> {
    if !btc.is_finite() || btc < 0.0 || (!allow_zero && btc == 0.0) {
        return Err(TxChainError::Config(format!(
            "{field} must be a positive amount, got {btc}"
        )));
    }
    Amount::from_btc(btc).map_err(|e| TxChainError::Config(format!("{field}: {e}")))
}

impl Settings {
    /// Load settings from a TOML file, with environment overrides on top.
    pub fn from_toml(path: &str) -> Result<Self, TxChainError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("TXCHAIN")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, TxChainError> {
        let config = Config::builder()
            .add_source(File::from_str(toml_str, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validated run plans in configuration order.
    pub fn plans(&self) -> Result<Vec<ChainPlan>, TxChainError> {
        if self.runs.is_empty() {
            return Err(TxChainError::Config("no runs configured".into()));
        }

        self.runs
            .iter()
            .map(|run| {
                if run.hops.is_empty() {
                    return Err(TxChainError::Config(format!(
                        "run {} has no hops",
                        run.name
                    )));
                }
                let funding_amount =
                    btc_amount(&format!("runs.{}.funding_amount", run.name), run.funding_amount, false)?;
                let hop_amounts = run
                    .hops
                    .iter()
                    .enumerate()
                    .map(|(i, btc)| btc_amount(&format!("runs.{}.hops[{i}]", run.name), *btc, false))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(ChainPlan {
                    name: run.name.clone(),
                    wallet: self.chain.wallet.clone(),
                    script_kind: run.script_kind,
                    funding_amount,
                    hop_amounts,
                    output_file: run.output_file.clone(),
                })
            })
            .collect()
    }
}
