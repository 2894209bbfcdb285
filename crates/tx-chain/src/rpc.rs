//! JSON-RPC client for a Bitcoin Core compatible node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Amount, BlockHash, Txid};
use chain_btc::{Address, BtcNetwork, PaymentOutput, ScriptKind, UnsignedTransaction, UnspentOutput};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use crate::config::RpcSettings;
use crate::service::{DecodedTransaction, ServiceError, SignedTransaction, WalletService};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcUnspent {
    txid: Txid,
    vout: u32,
    #[serde(default)]
    address: String,
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    amount: Amount,
    confirmations: u32,
}

impl From<RpcUnspent> for UnspentOutput {
    fn from(u: RpcUnspent) -> Self {
        UnspentOutput {
            txid: u.txid,
            vout: u.vout,
            amount: u.amount,
            address: u.address,
            confirmations: u.confirmations,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcSignError {
    #[serde(default)]
    txid: String,
    #[serde(default)]
    vout: u32,
    error: String,
}

#[derive(Debug, Deserialize)]
struct RpcSigned {
    hex: String,
    complete: bool,
    #[serde(default)]
    errors: Vec<RpcSignError>,
}

#[derive(Debug, Deserialize)]
struct RpcWalletTransaction {
    confirmations: i64,
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Node,
    Wallet,
}

/// Node client speaking JSON-RPC 1.0 over HTTP with basic auth.
pub struct BitcoindRpc {
    client: Client,
    url: String,
    user: String,
    password: SecretString,
    wallet: String,
    network: BtcNetwork,
    next_id: AtomicU64,
}

impl BitcoindRpc {
    pub fn new(settings: &RpcSettings, wallet: &str) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            url: settings.url.trim_end_matches('/').to_string(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            wallet: wallet.to_string(),
            network: settings.network,
            next_id: AtomicU64::new(1),
        })
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> String {
        match endpoint {
            Endpoint::Node => self.url.clone(),
            Endpoint::Wallet => format!("{}/wallet/{}", self.url, self.wallet),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        method: &str,
        params: Value,
    ) -> Result<T, ServiceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = request_body(id, method, params);
        trace!(method, id, "rpc request");

        let response = self
            .client
            .post(self.endpoint_url(endpoint))
            .basic_auth(&self.user, Some(self.password.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(format!("{method}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Transport(format!("{method}: {e}")))?;

        debug!(method, id, %status, "rpc response");
        parse_response(method, status, &text)
    }
}

fn request_body(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "1.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Bitcoin Core answers RPC errors with HTTP 500 and a JSON body, so the body
/// is inspected before the status.
fn parse_response<T: DeserializeOwned>(
    method: &str,
    status: StatusCode,
    body: &str,
) -> Result<T, ServiceError> {
    let parsed: RpcResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) if status.is_success() => {
            return Err(ServiceError::Decode(format!("{method}: {e}")));
        }
        Err(_) => {
            return Err(ServiceError::Transport(format!("{method}: http status {status}")));
        }
    };

    if let Some(err) = parsed.error {
        return Err(ServiceError::Rpc {
            code: err.code,
            message: err.message,
        });
    }

    serde_json::from_value(parsed.result)
        .map_err(|e| ServiceError::Decode(format!("{method}: {e}")))
}

fn input_params(tx: &UnsignedTransaction) -> Value {
    Value::Array(
        tx.inputs
            .iter()
            .map(|i| json!({ "txid": i.txid.to_string(), "vout": i.vout }))
            .collect(),
    )
}

/// Outputs as an array of single-key objects, which keeps their order.
fn output_params(outputs: &[PaymentOutput]) -> Value {
    Value::Array(
        outputs
            .iter()
            .map(|o| {
                let mut entry = Map::new();
                entry.insert(o.address.clone(), json!(o.amount.to_btc()));
                Value::Object(entry)
            })
            .collect(),
    )
}

#[async_trait]
impl WalletService for BitcoindRpc {
    async fn load_wallet(&self, name: &str) -> Result<(), ServiceError> {
        let _: Value = self.call(Endpoint::Node, "loadwallet", json!([name])).await?;
        Ok(())
    }

    async fn create_wallet(&self, name: &str) -> Result<(), ServiceError> {
        let _: Value = self.call(Endpoint::Node, "createwallet", json!([name])).await?;
        Ok(())
    }

    async fn new_address(&self, kind: ScriptKind) -> Result<Address, ServiceError> {
        let raw: String = self
            .call(Endpoint::Wallet, "getnewaddress", json!(["", kind.rpc_name()]))
            .await?;
        Address::parse_as(&raw, kind, self.network)
            .map_err(|e| ServiceError::Decode(format!("getnewaddress: {e}")))
    }

    async fn pay(&self, destination: &Address, amount: Amount) -> Result<Txid, ServiceError> {
        self.call(
            Endpoint::Wallet,
            "sendtoaddress",
            json!([destination.as_str(), amount.to_btc()]),
        )
        .await
    }

    async fn confirm(
        &self,
        block_count: u32,
        reward: &Address,
    ) -> Result<Vec<BlockHash>, ServiceError> {
        self.call(
            Endpoint::Node,
            "generatetoaddress",
            json!([block_count, reward.as_str()]),
        )
        .await
    }

    async fn confirmations(&self, txid: &Txid) -> Result<u32, ServiceError> {
        let tx: RpcWalletTransaction = self
            .call(Endpoint::Wallet, "gettransaction", json!([txid.to_string()]))
            .await?;
        // Negative for transactions conflicting with the best chain.
        Ok(u32::try_from(tx.confirmations).unwrap_or(0))
    }

    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[Address],
    ) -> Result<Vec<UnspentOutput>, ServiceError> {
        let addresses: Vec<&str> = addresses.iter().map(Address::as_str).collect();
        let utxos: Vec<RpcUnspent> = self
            .call(
                Endpoint::Wallet,
                "listunspent",
                json!([min_conf, max_conf, addresses]),
            )
            .await?;
        Ok(utxos.into_iter().map(UnspentOutput::from).collect())
    }

    async fn build_unsigned(&self, tx: &UnsignedTransaction) -> Result<String, ServiceError> {
        self.call(
            Endpoint::Node,
            "createrawtransaction",
            json!([input_params(tx), output_params(&tx.outputs)]),
        )
        .await
    }

    async fn decode(&self, hex: &str) -> Result<DecodedTransaction, ServiceError> {
        self.call(Endpoint::Node, "decoderawtransaction", json!([hex]))
            .await
    }

    async fn sign(&self, hex: &str) -> Result<SignedTransaction, ServiceError> {
        let signed: RpcSigned = self
            .call(Endpoint::Wallet, "signrawtransactionwithwallet", json!([hex]))
            .await?;
        Ok(SignedTransaction {
            hex: signed.hex,
            complete: signed.complete,
            errors: signed
                .errors
                .into_iter()
                .map(|e| format!("{}:{}: {}", e.txid, e.vout, e.error))
                .collect(),
        })
    }

    async fn relay(&self, hex: &str) -> Result<Txid, ServiceError> {
        self.call(Endpoint::Node, "sendrawtransaction", json!([hex]))
            .await
    }
}
