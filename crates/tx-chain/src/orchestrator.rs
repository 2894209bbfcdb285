//! Drives one chain run: wallet setup, funding, then build, sign, broadcast and
//! confirm for every hop, and finally the audit record.
//!
//! Hops are numbered from 1. Hop `n` spends everything held by address `n - 1`
//! and pays the configured amount to address `n`, returning change (if any) to
//! the spending address. Nothing is persisted unless every hop confirmed.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bitcoin::{Amount, Txid};
use chain_btc::{
    build, compute_change, Address, FeePolicy, PaymentRequest, ScriptKind, SelectionStrategy,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::confirm::{ConfirmationMode, Confirmer};
use crate::error::{ChainError, Stage, TxChainError};
use crate::record::{Hop, TransactionChainRecord};
use crate::recorder::{PersistedArtifact, Recorder};
use crate::selector::{ConfirmationWindow, UtxoSelector};
use crate::service::WalletService;
use crate::signer::Signer;

/// What a single run does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPlan {
    pub name: String,
    pub wallet: String,
    pub script_kind: ScriptKind,
    pub funding_amount: Amount,
    /// Amount paid at each hop, in chain order.
    pub hop_amounts: Vec<Amount>,
    /// File name of the record, relative to the recorder's data directory.
    pub output_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    Init,
    WalletReady,
    Funding,
    /// Waiting for a confirmation; `hop` is `None` for the funding transaction.
    AwaitingConfirmation { hop: Option<usize> },
    Building { hop: usize },
    Signing { hop: usize },
    Broadcasting { hop: usize },
    Recording,
    Complete,
    Aborted {
        hop: Option<usize>,
        stage: Stage,
        cause: String,
    },
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Init => f.write_str("init"),
            ChainState::WalletReady => f.write_str("wallet ready"),
            ChainState::Funding => f.write_str("funding"),
            ChainState::AwaitingConfirmation { hop: None } => {
                f.write_str("awaiting funding confirmation")
            }
            ChainState::AwaitingConfirmation { hop: Some(hop) } => {
                write!(f, "awaiting confirmation of hop {hop}")
            }
            ChainState::Building { hop } => write!(f, "building hop {hop}"),
            ChainState::Signing { hop } => write!(f, "signing hop {hop}"),
            ChainState::Broadcasting { hop } => write!(f, "broadcasting hop {hop}"),
            ChainState::Recording => f.write_str("recording"),
            ChainState::Complete => f.write_str("complete"),
            ChainState::Aborted { stage, cause, .. } => {
                write!(f, "aborted at {stage}: {cause}")
            }
        }
    }
}

/// A run that reached `Complete`.
#[derive(Debug, Clone)]
pub struct CompletedChain {
    pub record: TransactionChainRecord,
    pub artifact: PersistedArtifact,
}

pub struct ChainOrchestrator {
    service: Arc<dyn WalletService>,
    selector: UtxoSelector,
    signer: Signer,
    confirmer: Confirmer,
    policy: FeePolicy,
    recorder: Recorder,
    cancel: CancellationToken,
    state: ChainState,
    history: Vec<ChainState>,
}

impl ChainOrchestrator {
    pub fn new(
        service: Arc<dyn WalletService>,
        policy: FeePolicy,
        window: ConfirmationWindow,
        mode: ConfirmationMode,
        recorder: Recorder,
    ) -> Self {
        Self {
            selector: UtxoSelector::new(service.clone(), window),
            signer: Signer::new(service.clone()),
            confirmer: Confirmer::new(service.clone(), mode),
            service,
            policy,
            recorder,
            cancel: CancellationToken::new(),
            state: ChainState::Init,
            history: vec![ChainState::Init],
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.selector = self.selector.with_strategy(strategy);
        self
    }

    /// Abort the run as soon as `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Every state entered during the latest run, in order.
    pub fn history(&self) -> &[ChainState] {
        &self.history
    }

    pub async fn run(&mut self, plan: &ChainPlan) -> Result<CompletedChain, ChainError> {
        self.state = ChainState::Init;
        self.history = vec![ChainState::Init];

        let span = info_span!("chain", run = %plan.name, kind = %plan.script_kind);
        let outcome = self.execute(plan).instrument(span).await;

        match outcome {
            Ok(done) => {
                self.transition(ChainState::Complete);
                Ok(done)
            }
            Err(err) => {
                error!(run = %plan.name, hop = ?err.hop, stage = %err.stage, error = %err.source, "chain aborted");
                self.transition(ChainState::Aborted {
                    hop: err.hop,
                    stage: err.stage,
                    cause: err.source.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn execute(&mut self, plan: &ChainPlan) -> Result<CompletedChain, ChainError> {
        if plan.hop_amounts.is_empty() {
            return Err(ChainError::new(
                None,
                Stage::Addresses,
                TxChainError::Config(format!("run {} has no hops", plan.name)),
            ));
        }

        let handle = self
            .guarded(None, Stage::WalletSetup, async {
                self.service
                    .ensure_wallet(&plan.wallet)
                    .await
                    .map_err(|source| TxChainError::WalletUnavailable {
                        wallet: plan.wallet.clone(),
                        source,
                    })
            })
            .await?;
        debug!(wallet = %handle.name, status = ?handle.status, "wallet setup done");
        self.transition(ChainState::WalletReady);

        let count = plan.hop_amounts.len() + 1;
        let addresses = self
            .guarded(
                None,
                Stage::Addresses,
                self.generate_addresses(plan.script_kind, count),
            )
            .await?;

        self.transition(ChainState::Funding);
        let funding_txid = self
            .guarded(
                None,
                Stage::Fund,
                self.service.pay(&addresses[0], plan.funding_amount),
            )
            .await?;
        info!(txid = %funding_txid, address = %addresses[0], amount = %plan.funding_amount, "funding sent");
        self.confirm(None, &funding_txid).await?;

        let mut hops = Vec::with_capacity(plan.hop_amounts.len());
        for (index, amount) in plan.hop_amounts.iter().copied().enumerate() {
            let hop = self
                .run_hop(index + 1, &addresses[index], &addresses[index + 1], amount)
                .await?;
            hops.push(hop);
        }

        let record = TransactionChainRecord {
            script_kind: plan.script_kind,
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            funding_txid,
            funding_amount: plan.funding_amount,
            hops,
        };

        self.transition(ChainState::Recording);
        let artifact = self
            .guarded(
                None,
                Stage::Record,
                self.recorder.record(&plan.output_file, &record),
            )
            .await?;

        Ok(CompletedChain { record, artifact })
    }

    async fn run_hop(
        &mut self,
        hop: usize,
        source: &Address,
        destination: &Address,
        amount: Amount,
    ) -> Result<Hop, ChainError> {
        self.transition(ChainState::Building { hop });

        let utxos = self
            .guarded(
                Some(hop),
                Stage::Select,
                self.selector.select(source, amount, &self.policy),
            )
            .await?;

        let request = PaymentRequest::single(destination.as_str(), amount);
        let change = compute_change(&utxos, &request, source.as_str(), &self.policy)
            .map_err(|e| ChainError::new(Some(hop), Stage::Change, e.into()))?;
        if !change.change_emitted && change.change > Amount::ZERO {
            warn!(hop, change = %change.change, "change below dust threshold forfeited to fee");
        }

        let unsigned = build(&utxos, change.outputs.clone())
            .map_err(|e| ChainError::new(Some(hop), Stage::Build, e.into()))?;
        let unsigned_hex = self
            .guarded(Some(hop), Stage::Build, self.service.build_unsigned(&unsigned))
            .await?;

        let decoded_unsigned = self
            .guarded(Some(hop), Stage::Decode, self.service.decode(&unsigned_hex))
            .await?;
        for output in &decoded_unsigned.vout {
            debug!(
                hop,
                n = output.n,
                value = %output.value,
                script_type = %output.script_pub_key.script_type,
                asm = %output.script_pub_key.asm,
                "output script"
            );
        }
        if let Some(output) = decoded_unsigned.output_to(destination.as_str()) {
            info!(
                hop,
                n = output.n,
                script_type = %output.script_pub_key.script_type,
                script_pub_key = %output.script_pub_key.asm,
                "locking script"
            );
        }

        self.transition(ChainState::Signing { hop });
        let signed = self
            .guarded(Some(hop), Stage::Sign, self.signer.sign(&unsigned_hex))
            .await?;
        let decoded = self
            .guarded(Some(hop), Stage::Decode, self.service.decode(&signed.hex))
            .await?;
        if let Some(input) = decoded.vin.first() {
            info!(
                hop,
                script_sig = %input.script_sig.asm,
                witness = ?input.txinwitness,
                "unlocking script"
            );
        }

        self.transition(ChainState::Broadcasting { hop });
        let txid = self
            .guarded(Some(hop), Stage::Broadcast, self.signer.broadcast(&signed))
            .await?;
        if txid != decoded.txid {
            warn!(hop, relayed = %txid, decoded = %decoded.txid, "relayed txid differs from decoded txid");
        }
        info!(
            hop,
            %txid,
            source = %source,
            destination = %destination,
            amount = %amount,
            fee = %change.effective_fee(),
            inputs = unsigned.inputs.len(),
            "hop broadcast"
        );

        self.confirm(Some(hop), &txid).await?;

        Ok(Hop {
            source: source.to_string(),
            destination: destination.to_string(),
            amount,
            fee: change.effective_fee(),
            txid,
            unsigned_hex,
            raw_hex: signed.hex,
            decoded_transaction: decoded,
        })
    }

    async fn generate_addresses(
        &self,
        kind: ScriptKind,
        count: usize,
    ) -> Result<Vec<Address>, TxChainError> {
        let mut addresses = Vec::with_capacity(count);
        for _ in 0..count {
            let address = self.service.new_address(kind).await?;
            if addresses.contains(&address) {
                return Err(TxChainError::DuplicateAddress(address.to_string()));
            }
            debug!(%address, %kind, "generated address");
            addresses.push(address);
        }
        Ok(addresses)
    }

    async fn confirm(&mut self, hop: Option<usize>, txid: &Txid) -> Result<(), ChainError> {
        self.transition(ChainState::AwaitingConfirmation { hop });
        self.guarded(hop, Stage::Confirm, self.confirmer.await_confirmation(txid))
            .await?;
        Ok(())
    }

    /// Await `step`, giving up as soon as the run is cancelled.
    async fn guarded<T, E, F>(&self, hop: Option<usize>, stage: Stage, step: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<TxChainError>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChainError::new(hop, stage, TxChainError::Cancelled)),
            result = step => result.map_err(|e| ChainError::new(hop, stage, e.into())),
        }
    }

    fn transition(&mut self, next: ChainState) {
        info!(state = %next, "chain state");
        self.history.push(next.clone());
        self.state = next;
    }
}
