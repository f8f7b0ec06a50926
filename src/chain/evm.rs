//! EVM Chain Client
//!
//! JSON-RPC client for one bridge contract on an Ethereum-compatible chain.
//! Transactions are sent with `eth_sendTransaction` from the configured
//! signer account, so the key stays with the node (or the signing proxy in
//! front of it).

use alloy_primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::abi;
use super::error::ChainError;
use super::{
    ChainClient, ChainEvent, ContractCall, EventFilter, EventKind, FeeEstimate, Receipt, TxRef,
};
use crate::config::ChainConfig;

/// Client for one configured chain + contract
pub struct EvmChainClient {
    config: ChainConfig,
    client: reqwest::Client,
    locked_topic: B256,
}

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthLog {
    topics: Vec<String>,
    data: String,
    block_number: String,
    transaction_hash: String,
    log_index: String,
    #[serde(default)]
    removed: bool,
}

/// Failure of a single RPC round-trip, before it is mapped to a
/// stage-specific [`ChainError`].
enum RpcFailure {
    /// Request never got a JSON-RPC answer
    Transport(String),
    /// Node answered with an error object
    Node { code: i64, message: String },
}

impl RpcFailure {
    fn into_chain_error(self) -> ChainError {
        match self {
            RpcFailure::Transport(msg) => ChainError::Rpc(msg),
            RpcFailure::Node { code, message } => {
                ChainError::Rpc(format!("RPC error {}: {}", code, message))
            }
        }
    }
}

impl EvmChainClient {
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        abi::check_layout(&config.abi.lock_function, abi::LOCK_PARAMS)?;
        abi::check_layout(&config.abi.mint_function, abi::MINT_PARAMS)?;
        abi::check_layout(&config.abi.locked_event, abi::LOCKED_EVENT_PARAMS)?;

        info!(
            chain = %config.chain_id,
            rpc = %config.rpc.url,
            contract = %config.contract_address,
            confirmations = config.required_confirmations,
            "Initializing EVM chain client"
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.rpc.timeout_ms))
            .build()
            .map_err(|e| ChainError::Rpc(format!("Failed to create HTTP client: {}", e)))?;

        let locked_topic = abi::event_topic(&config.abi.locked_event);

        Ok(Self {
            config,
            client,
            locked_topic,
        })
    }

    /// Single JSON-RPC round-trip. A `null` result is `Ok(None)`.
    async fn rpc_call_optional<T, R>(
        &self,
        method: &'static str,
        params: T,
    ) -> Result<Option<R>, RpcFailure>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.config.rpc.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(format!("{} request failed: {}", method, e)))?;

        let rpc_response: JsonRpcResponse<R> = response.json().await.map_err(|e| {
            RpcFailure::Transport(format!("{}: failed to parse response: {}", method, e))
        })?;

        if let Some(error) = rpc_response.error {
            return Err(RpcFailure::Node {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, RpcFailure>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        self.rpc_call_optional(method, params)
            .await?
            .ok_or_else(|| RpcFailure::Transport(format!("{}: no result in response", method)))
    }

    fn encode(&self, call: &ContractCall) -> Result<String, ChainError> {
        let data = match call {
            ContractCall::Lock { asset_id } => {
                abi::encode_lock(&self.config.abi.lock_function, *asset_id)
            }
            ContractCall::Mint {
                owner,
                asset_id,
                token_uri,
            } => abi::encode_mint(&self.config.abi.mint_function, owner, *asset_id, token_uri)?,
        };
        Ok(abi::to_hex(&data))
    }

    fn tx_object(&self, data: &str) -> serde_json::Value {
        json!({
            "from": self.config.signer_address,
            "to": self.config.contract_address,
            "data": data,
        })
    }

    async fn latest_block(&self) -> Result<u64, ChainError> {
        let result: String = self
            .rpc_call("eth_blockNumber", json!([]))
            .await
            .map_err(RpcFailure::into_chain_error)?;
        abi::parse_u64(&result)
    }

    /// One receipt poll. `Ok(None)` while not yet at the required depth.
    async fn poll_receipt(&self, tx: &TxRef) -> Result<Option<Receipt>, ChainError> {
        let receipt: Option<EthReceipt> = self
            .rpc_call_optional("eth_getTransactionReceipt", (tx.hash.as_str(),))
            .await
            .map_err(RpcFailure::into_chain_error)?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(block_hex) = receipt.block_number else {
            return Ok(None); // pending
        };

        if receipt.status.as_deref() == Some("0x0") {
            return Err(ChainError::ConfirmationFailed {
                tx_hash: receipt.transaction_hash,
            });
        }

        let block = abi::parse_u64(&block_hex)?;
        let latest = self.latest_block().await?;
        let confirmations = latest.saturating_add(1).saturating_sub(block);

        if confirmations < self.config.required_confirmations as u64 {
            debug!(
                chain = %self.config.chain_id,
                tx_hash = %tx.hash,
                confirmations,
                required = self.config.required_confirmations,
                "Waiting for confirmations"
            );
            return Ok(None);
        }

        Ok(Some(Receipt {
            tx: tx.clone().confirmed_at(block),
            block_number: block,
            confirmations,
        }))
    }

    fn decode_locked(&self, log: EthLog) -> Result<ChainEvent, ChainError> {
        let topics = log
            .topics
            .iter()
            .map(|t| abi::parse_topic(t))
            .collect::<Result<Vec<_>, _>>()?;
        let data = abi::from_hex(&log.data)?;
        let locked = abi::decode_locked(&topics, &data).map_err(|e| {
            ChainError::Decode(format!("{} in tx {}", e, log.transaction_hash))
        })?;

        Ok(ChainEvent {
            kind: EventKind::Locked,
            owner: locked.owner.to_checksum(None),
            asset_id: locked.asset_id,
            token_uri: locked.token_uri,
            block_number: abi::parse_u64(&log.block_number)?,
            log_index: abi::parse_u64(&log.log_index)?,
            tx_hash: log.transaction_hash,
        })
    }
}

/// Node-side rejections worth resubmitting: nonce races and replacement
/// pricing. Everything else the node refuses is final.
fn is_retryable_rejection(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("nonce") || msg.contains("underpriced") || msg.contains("already known")
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn chain_id(&self) -> &str {
        &self.config.chain_id
    }

    async fn submit(&self, call: &ContractCall, fee: &FeeEstimate) -> Result<TxRef, ChainError> {
        let data = self.encode(call)?;
        let mut tx = self.tx_object(&data);
        tx["gas"] = json!(format!("0x{:x}", fee.gas_units));
        tx["gasPrice"] = json!(format!("0x{:x}", fee.unit_price));

        let hash: String = self
            .rpc_call("eth_sendTransaction", (tx,))
            .await
            .map_err(|e| match e {
                RpcFailure::Transport(reason) => ChainError::Submission {
                    chain: self.config.chain_id.clone(),
                    reason,
                    retryable: true,
                },
                RpcFailure::Node { code, message } => ChainError::Submission {
                    chain: self.config.chain_id.clone(),
                    retryable: is_retryable_rejection(&message),
                    reason: format!("RPC error {}: {}", code, message),
                },
            })?;

        info!(
            chain = %self.config.chain_id,
            tx_hash = %hash,
            call = %call,
            "Transaction submitted"
        );
        Ok(TxRef::new(self.config.chain_id.clone(), hash))
    }

    async fn estimate_fee(&self, call: &ContractCall) -> Result<FeeEstimate, ChainError> {
        let data = self.encode(call)?;
        let tx = self.tx_object(&data);

        // A revert during estimation means the call itself is invalid
        let gas: String = self
            .rpc_call("eth_estimateGas", (tx,))
            .await
            .map_err(|e| match e {
                RpcFailure::Transport(msg) => ChainError::Rpc(msg),
                RpcFailure::Node { code, message } => ChainError::Submission {
                    chain: self.config.chain_id.clone(),
                    retryable: is_retryable_rejection(&message),
                    reason: format!("estimation rejected ({}): {}", code, message),
                },
            })?;
        let price: String = self
            .rpc_call("eth_gasPrice", json!([]))
            .await
            .map_err(RpcFailure::into_chain_error)?;

        Ok(FeeEstimate::new(
            abi::parse_u64(&gas)?,
            abi::parse_quantity(&price)?,
        ))
    }

    async fn await_confirmation(
        &self,
        tx: &TxRef,
        timeout: Duration,
    ) -> Result<Receipt, ChainError> {
        let started = Instant::now();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        let wait = async {
            loop {
                match self.poll_receipt(tx).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {
                        warn!(
                            chain = %self.config.chain_id,
                            tx_hash = %tx.hash,
                            error = %e,
                            "Receipt poll failed (will retry)"
                        );
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::ConfirmationTimeout {
                tx_hash: tx.hash.clone(),
                waited: started.elapsed(),
            }),
        }
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<ChainEvent>, ChainError> {
        let topic0 = match filter.kind {
            EventKind::Locked => self.locked_topic.to_string(),
        };
        let asset_topic = filter.asset_id.map(|id| abi::asset_topic(id).to_string());

        let params = json!({
            "address": self.config.contract_address,
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
            "topics": [topic0, serde_json::Value::Null, asset_topic],
        });

        let logs: Vec<EthLog> = self
            .rpc_call("eth_getLogs", (params,))
            .await
            .map_err(RpcFailure::into_chain_error)?;

        let mut events = logs
            .into_iter()
            .filter(|log| !log.removed)
            .map(|log| self.decode_locked(log))
            .collect::<Result<Vec<_>, _>>()?;

        events.sort_by_key(|e| (e.block_number, e.log_index));
        debug!(
            chain = %self.config.chain_id,
            count = events.len(),
            from = filter.from_block,
            to = filter.to_block,
            "Queried Locked events"
        );
        Ok(events)
    }
}
