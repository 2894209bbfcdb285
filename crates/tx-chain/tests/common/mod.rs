//! In-memory regtest node for driving the pipeline without bitcoind.
//!
//! Transactions are real `bitcoin` transactions: building serializes them,
//! signing attaches placeholder unlocking data of the right shape for the
//! script kind, and relaying checks that inputs exist, are unspent and cover
//! the outputs. Every call is logged so tests can assert on ordering.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize_hex, serialize_hex};
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, BlockHash, CompressedPublicKey, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use chain_btc::{Address, BtcNetwork, FeePolicy, ScriptKind, UnsignedTransaction, UnspentOutput};
use tx_chain::service::{DecodedInput, DecodedOutput, ScriptPubKey, ScriptSig};
use tx_chain::{
    ChainOrchestrator, ChainPlan, ConfirmationMode, ConfirmationWindow, DecodedTransaction,
    Recorder, ServiceError, SignedTransaction, WalletService,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    LoadWallet,
    CreateWallet,
    NewAddress,
    Pay,
    Confirm,
    Confirmations,
    ListUnspent,
    BuildUnsigned,
    Decode,
    Sign,
    Relay,
}

/// Failure injection switches.
#[derive(Debug, Default, Clone)]
pub struct Faults {
    pub load_error: Option<ServiceError>,
    pub incomplete_sign: bool,
    pub reject_relay: Option<ServiceError>,
    /// Number of `confirm` calls that fail before mining works.
    pub mining_failures: u32,
    /// Mining succeeds but nothing ever confirms.
    pub never_confirm: bool,
    /// `list_unspent` also reports an output owned by another address.
    pub leak_foreign: bool,
    /// `new_address` keeps handing out the first address.
    pub repeat_address: bool,
}

struct KeyInfo {
    kind: ScriptKind,
    key: CompressedPublicKey,
}

struct Coin {
    value: Amount,
    address: String,
    height: Option<u32>,
}

#[derive(Default)]
struct NodeState {
    calls: Vec<Call>,
    faults: Faults,
    wallet_exists: bool,
    wallet_loaded: bool,
    next_key: u32,
    next_funding: u32,
    keys: HashMap<String, KeyInfo>,
    scripts: HashMap<ScriptBuf, String>,
    utxos: HashMap<OutPoint, Coin>,
    /// Height at which each known transaction confirmed.
    heights: HashMap<Txid, Option<u32>>,
    relayed_fees: Vec<Amount>,
    tip: u32,
}

pub struct FakeNode {
    state: Mutex<NodeState>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(NodeState::default()),
        })
    }

    pub fn with_faults(faults: Faults) -> Arc<Self> {
        let node = Self::new();
        node.state.lock().unwrap().faults = faults;
        node
    }

    /// A node whose wallet already exists on disk but is not loaded.
    pub fn with_existing_wallet() -> Arc<Self> {
        let node = Self::new();
        node.state.lock().unwrap().wallet_exists = true;
        node
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.lock().unwrap().faults = faults;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn relayed_fees(&self) -> Vec<Amount> {
        self.state.lock().unwrap().relayed_fees.clone()
    }

    /// Unspent value held by `address`, confirmed or not.
    pub fn balance(&self, address: &str) -> Amount {
        self.state
            .lock()
            .unwrap()
            .utxos
            .values()
            .filter(|c| c.address == address)
            .map(|c| c.value)
            .sum()
    }

    pub fn wallet_loaded(&self) -> bool {
        self.state.lock().unwrap().wallet_loaded
    }

    fn log(&self, call: Call) -> std::sync::MutexGuard<'_, NodeState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

impl NodeState {
    fn confirmations(&self, height: Option<u32>) -> u32 {
        match height {
            Some(h) => self.tip - h + 1,
            None => 0,
        }
    }

    fn script_for(&self, address: &str) -> Result<ScriptBuf, ServiceError> {
        self.scripts
            .iter()
            .find(|(_, a)| a.as_str() == address)
            .map(|(s, _)| s.clone())
            .ok_or_else(|| ServiceError::rpc(-5, format!("Invalid address: {address}")))
    }

    fn add_outputs(&mut self, tx: &Transaction) {
        let txid = tx.compute_txid();
        for (vout, out) in tx.output.iter().enumerate() {
            let address = self
                .scripts
                .get(&out.script_pubkey)
                .cloned()
                .unwrap_or_default();
            self.utxos.insert(
                OutPoint::new(txid, vout as u32),
                Coin {
                    value: out.value,
                    address,
                    height: None,
                },
            );
        }
        self.heights.insert(txid, None);
    }
}

fn placeholder(len: usize, byte: u8) -> PushBytesBuf {
    PushBytesBuf::try_from(vec![byte; len]).unwrap()
}

fn script_type(script: &bitcoin::Script) -> &'static str {
    if script.is_p2pkh() {
        "pubkeyhash"
    } else if script.is_p2sh() {
        "scripthash"
    } else if script.is_p2wpkh() {
        "witness_v0_keyhash"
    } else if script.is_p2tr() {
        "witness_v1_taproot"
    } else {
        "nonstandard"
    }
}

#[async_trait]
impl WalletService for FakeNode {
    async fn load_wallet(&self, name: &str) -> Result<(), ServiceError> {
        let mut state = self.log(Call::LoadWallet);
        if let Some(err) = state.faults.load_error.clone() {
            return Err(err);
        }
        if !state.wallet_exists {
            return Err(ServiceError::rpc(-18, format!("Wallet file not found: {name}")));
        }
        if state.wallet_loaded {
            return Err(ServiceError::rpc(-35, format!("Wallet \"{name}\" is already loaded.")));
        }
        state.wallet_loaded = true;
        Ok(())
    }

    async fn create_wallet(&self, name: &str) -> Result<(), ServiceError> {
        let mut state = self.log(Call::CreateWallet);
        if state.wallet_exists {
            return Err(ServiceError::rpc(-4, format!("Wallet file verification failed: {name} exists")));
        }
        state.wallet_exists = true;
        state.wallet_loaded = true;
        Ok(())
    }

    async fn new_address(&self, kind: ScriptKind) -> Result<Address, ServiceError> {
        let mut state = self.log(Call::NewAddress);
        if !(state.faults.repeat_address && state.next_key > 0) {
            state.next_key += 1;
        }

        let mut secret = [0u8; 32];
        secret[28..].copy_from_slice(&state.next_key.to_be_bytes());
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&secret).unwrap();
        let key = CompressedPublicKey(sk.public_key(&secp));

        let address = match kind {
            ScriptKind::Legacy => bitcoin::Address::p2pkh(key.pubkey_hash(), Network::Regtest),
            ScriptKind::P2shSegwit => bitcoin::Address::p2shwpkh(&key, Network::Regtest),
            ScriptKind::Bech32 => bitcoin::Address::p2wpkh(&key, Network::Regtest),
            ScriptKind::Bech32m => {
                let (internal, _) = sk.x_only_public_key(&secp);
                bitcoin::Address::p2tr(&secp, internal, None, Network::Regtest)
            }
        };
        let text = address.to_string();
        state.scripts.insert(address.script_pubkey(), text.clone());
        state.keys.insert(text.clone(), KeyInfo { kind, key });

        Address::parse_as(&text, kind, BtcNetwork::Regtest)
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }

    async fn pay(&self, destination: &Address, amount: Amount) -> Result<Txid, ServiceError> {
        let mut state = self.log(Call::Pay);
        let script_pubkey = state.script_for(destination.as_str())?;
        state.next_funding += 1;

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(
                    Txid::hash(&state.next_funding.to_le_bytes()),
                    0,
                ),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::from_slice(&[vec![0x30; 71], vec![0x02; 33]]),
            }],
            output: vec![TxOut {
                value: amount,
                script_pubkey,
            }],
        };
        state.add_outputs(&tx);
        Ok(tx.compute_txid())
    }

    async fn confirm(
        &self,
        block_count: u32,
        _reward: &Address,
    ) -> Result<Vec<BlockHash>, ServiceError> {
        let mut state = self.log(Call::Confirm);
        if state.faults.mining_failures > 0 {
            state.faults.mining_failures -= 1;
            return Err(ServiceError::Transport("connection reset by peer".into()));
        }

        let first = state.tip + 1;
        state.tip += block_count;
        if !state.faults.never_confirm {
            for height in state.heights.values_mut().filter(|h| h.is_none()) {
                *height = Some(first);
            }
            for coin in state.utxos.values_mut().filter(|c| c.height.is_none()) {
                coin.height = Some(first);
            }
        }
        Ok((first..=state.tip)
            .map(|h| BlockHash::hash(&h.to_le_bytes()))
            .collect())
    }

    async fn confirmations(&self, txid: &Txid) -> Result<u32, ServiceError> {
        let state = self.log(Call::Confirmations);
        match state.heights.get(txid) {
            Some(height) => Ok(state.confirmations(*height)),
            None => Err(ServiceError::rpc(-5, "Invalid or non-wallet transaction id")),
        }
    }

    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[Address],
    ) -> Result<Vec<UnspentOutput>, ServiceError> {
        let state = self.log(Call::ListUnspent);
        let mut listed: Vec<UnspentOutput> = state
            .utxos
            .iter()
            .filter(|(_, coin)| addresses.iter().any(|a| a.as_str() == coin.address))
            .map(|(outpoint, coin)| UnspentOutput {
                txid: outpoint.txid,
                vout: outpoint.vout,
                amount: coin.value,
                address: coin.address.clone(),
                confirmations: state.confirmations(coin.height),
            })
            .filter(|u| u.confirmations >= min_conf && u.confirmations <= max_conf)
            .collect();
        listed.sort_by_key(|u| (u.txid, u.vout));

        if state.faults.leak_foreign {
            listed.push(UnspentOutput {
                txid: Txid::from_byte_array([0xee; 32]),
                vout: 7,
                amount: Amount::from_sat(5_000_000),
                address: "bcrt1qforeign".into(),
                confirmations: 10,
            });
        }
        Ok(listed)
    }

    async fn build_unsigned(&self, tx: &UnsignedTransaction) -> Result<String, ServiceError> {
        let state = self.log(Call::BuildUnsigned);
        let output = tx
            .outputs
            .iter()
            .map(|o| {
                Ok(TxOut {
                    value: o.amount,
                    script_pubkey: state.script_for(&o.address)?,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let unsigned = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx
                .inputs
                .iter()
                .map(|i| TxIn {
                    previous_output: (*i).into(),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
                .collect(),
            output,
        };
        Ok(serialize_hex(&unsigned))
    }

    async fn decode(&self, hex: &str) -> Result<DecodedTransaction, ServiceError> {
        let state = self.log(Call::Decode);
        let tx: Transaction = deserialize_hex(hex)
            .map_err(|e| ServiceError::rpc(-22, format!("TX decode failed: {e}")))?;

        Ok(DecodedTransaction {
            txid: tx.compute_txid(),
            hash: tx.compute_wtxid().to_string(),
            version: tx.version.0,
            size: tx.total_size() as u64,
            vsize: tx.vsize() as u64,
            weight: tx.weight().to_wu(),
            locktime: tx.lock_time.to_consensus_u32(),
            vin: tx
                .input
                .iter()
                .map(|input| DecodedInput {
                    txid: input.previous_output.txid,
                    vout: input.previous_output.vout,
                    script_sig: ScriptSig {
                        asm: input.script_sig.to_asm_string(),
                        hex: input.script_sig.to_hex_string(),
                    },
                    txinwitness: (!input.witness.is_empty())
                        .then(|| input.witness.iter().map(hex::encode).collect()),
                    sequence: input.sequence.0,
                })
                .collect(),
            vout: tx
                .output
                .iter()
                .enumerate()
                .map(|(n, out)| DecodedOutput {
                    value: out.value,
                    n: n as u32,
                    script_pub_key: ScriptPubKey {
                        asm: out.script_pubkey.to_asm_string(),
                        desc: None,
                        hex: out.script_pubkey.to_hex_string(),
                        address: state.scripts.get(&out.script_pubkey).cloned(),
                        script_type: script_type(&out.script_pubkey).to_string(),
                    },
                })
                .collect(),
        })
    }

    async fn sign(&self, hex: &str) -> Result<SignedTransaction, ServiceError> {
        let state = self.log(Call::Sign);
        let mut tx: Transaction = deserialize_hex(hex)
            .map_err(|e| ServiceError::rpc(-22, format!("TX decode failed: {e}")))?;

        if state.faults.incomplete_sign {
            let errors = tx
                .input
                .iter()
                .map(|i| format!("{}:{}: Unable to sign input", i.previous_output.txid, i.previous_output.vout))
                .collect();
            return Ok(SignedTransaction {
                hex: hex.to_string(),
                complete: false,
                errors,
            });
        }

        for input in &mut tx.input {
            let coin = state
                .utxos
                .get(&input.previous_output)
                .ok_or_else(|| ServiceError::rpc(-25, "Input not found or already spent"))?;
            let info = state
                .keys
                .get(&coin.address)
                .ok_or_else(|| ServiceError::rpc(-4, "Private key not available"))?;
            let signature = vec![0x30; 71];
            let pubkey = info.key.to_bytes().to_vec();

            match info.kind {
                ScriptKind::Legacy => {
                    input.script_sig = Builder::new()
                        .push_slice(placeholder(71, 0x30))
                        .push_slice(PushBytesBuf::try_from(pubkey).unwrap())
                        .into_script();
                }
                ScriptKind::P2shSegwit => {
                    let redeem = ScriptBuf::new_p2wpkh(&info.key.wpubkey_hash());
                    input.script_sig = Builder::new()
                        .push_slice(PushBytesBuf::try_from(redeem.into_bytes()).unwrap())
                        .into_script();
                    input.witness = Witness::from_slice(&[signature, pubkey]);
                }
                ScriptKind::Bech32 => {
                    input.witness = Witness::from_slice(&[signature, pubkey]);
                }
                ScriptKind::Bech32m => {
                    input.witness = Witness::from_slice(&[vec![0x5c; 64]]);
                }
            }
        }

        Ok(SignedTransaction {
            hex: serialize_hex(&tx),
            complete: true,
            errors: Vec::new(),
        })
    }

    async fn relay(&self, hex: &str) -> Result<Txid, ServiceError> {
        let mut state = self.log(Call::Relay);
        if let Some(err) = state.faults.reject_relay.clone() {
            return Err(err);
        }
        let tx: Transaction = deserialize_hex(hex)
            .map_err(|e| ServiceError::rpc(-22, format!("TX decode failed: {e}")))?;

        let mut total_in = Amount::ZERO;
        for input in &tx.input {
            let coin = state
                .utxos
                .get(&input.previous_output)
                .ok_or_else(|| ServiceError::rpc(-25, "bad-txns-inputs-missingorspent"))?;
            if input.script_sig.is_empty() && input.witness.is_empty() {
                return Err(ServiceError::rpc(
                    -26,
                    "mandatory-script-verify-flag-failed (Operation not valid with the current stack size)",
                ));
            }
            total_in += coin.value;
        }
        let total_out: Amount = tx.output.iter().map(|o| o.value).sum();
        let fee = total_in
            .checked_sub(total_out)
            .ok_or_else(|| ServiceError::rpc(-26, "bad-txns-in-belowout"))?;

        for input in &tx.input {
            state.utxos.remove(&input.previous_output);
        }
        state.add_outputs(&tx);
        state.relayed_fees.push(fee);
        Ok(tx.compute_txid())
    }
}

/// Mining without backoff, so tests never sleep.
pub fn instant_mining() -> ConfirmationMode {
    ConfirmationMode::Mine {
        blocks: 1,
        retries: 0,
        backoff: Duration::ZERO,
    }
}

pub fn orchestrator(node: &Arc<FakeNode>, data_dir: &Path) -> ChainOrchestrator {
    ChainOrchestrator::new(
        node.clone(),
        FeePolicy::default(),
        ConfirmationWindow::default(),
        instant_mining(),
        Recorder::new(data_dir),
    )
}

pub fn btc(value: f64) -> Amount {
    Amount::from_btc(value).unwrap()
}

pub fn plan(kind: ScriptKind, hops: &[f64], output_file: &str) -> ChainPlan {
    ChainPlan {
        name: output_file.trim_end_matches(".json").to_string(),
        wallet: "test-wallet".into(),
        script_kind: kind,
        funding_amount: Amount::ONE_BTC,
        hop_amounts: hops.iter().map(|v| btc(*v)).collect(),
        output_file: output_file.into(),
    }
}
