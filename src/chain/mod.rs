//! Chain Client Module
//!
//! Uniform capability surface over one ledger. The bridge runs two instances
//! (source and destination) that differ only in endpoint, contract address
//! and contract interface; the orchestrator is written against
//! [`ChainClient`] alone.
//!
//! - [`evm`] - Ethereum JSON-RPC implementation
//! - [`abi`] - Minimal ABI encoding for the bridge contracts
//! - [`mock`] - Scripted in-memory client (feature `mock-chain`)

pub mod abi;
pub mod error;
pub mod evm;
#[cfg(any(test, feature = "mock-chain"))]
pub mod mock;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core_types::AssetId;

pub use error::ChainError;
pub use evm::EvmChainClient;

/// Unified interface for the source and destination ledgers
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain identifier used in tx references and logs (e.g., "polygon")
    fn chain_id(&self) -> &str;

    /// Dispatch a contract call paying at most `fee`.
    ///
    /// Success means the node accepted the transaction, not that it was
    /// included.
    async fn submit(&self, call: &ContractCall, fee: &FeeEstimate) -> Result<TxRef, ChainError>;

    /// Raw node estimate: gas units for `call` and current unit price
    async fn estimate_fee(&self, call: &ContractCall) -> Result<FeeEstimate, ChainError>;

    /// Wait until `tx` is buried at the configured confirmation depth.
    ///
    /// Gives up with `ConfirmationTimeout` after `timeout`, fails with
    /// `ConfirmationFailed` if the transaction reverted.
    async fn await_confirmation(
        &self,
        tx: &TxRef,
        timeout: Duration,
    ) -> Result<Receipt, ChainError>;

    /// Historical events matching `filter`, ordered by (block, log index).
    /// An empty result is not an error.
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<ChainEvent>, ChainError>;
}

/// Chain-agnostic contract call. Each client encodes it with its own ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    Lock {
        asset_id: AssetId,
    },
    Mint {
        owner: String,
        asset_id: AssetId,
        token_uri: String,
    },
}

impl ContractCall {
    pub fn asset_id(&self) -> AssetId {
        match self {
            ContractCall::Lock { asset_id } | ContractCall::Mint { asset_id, .. } => *asset_id,
        }
    }
}

impl fmt::Display for ContractCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractCall::Lock { asset_id } => write!(f, "lock({})", asset_id),
            ContractCall::Mint {
                owner,
                asset_id,
                token_uri,
            } => write!(f, "mint({}, {}, {})", owner, asset_id, token_uri),
        }
    }
}

/// Reference to a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef {
    pub chain: String,
    pub hash: String,
    /// Inclusion block, known once confirmed
    #[serde(default)]
    pub block: Option<u64>,
}

impl TxRef {
    pub fn new(chain: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            hash: hash.into(),
            block: None,
        }
    }

    pub fn confirmed_at(mut self, block: u64) -> Self {
        self.block = Some(block);
        self
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.hash)
    }
}

/// Gas units times unit price, in the chain's smallest unit (wei)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub gas_units: u64,
    pub unit_price: u128,
}

impl FeeEstimate {
    pub fn new(gas_units: u64, unit_price: u128) -> Self {
        Self {
            gas_units,
            unit_price,
        }
    }

    #[inline]
    pub fn total(&self) -> u128 {
        (self.gas_units as u128).saturating_mul(self.unit_price)
    }
}

/// Inclusion receipt of a confirmed, non-reverted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx: TxRef,
    pub block_number: u64,
    pub confirmations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `Locked(owner, tokenId, tokenURI)` on the source contract
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: EventKind,
    pub asset_id: Option<AssetId>,
    pub from_block: u64,
    pub to_block: u64,
}

impl EventFilter {
    /// `Locked` events for one asset within a single block
    pub fn locked_in_block(asset_id: AssetId, block: u64) -> Self {
        Self {
            kind: EventKind::Locked,
            asset_id: Some(asset_id),
            from_block: block,
            to_block: block,
        }
    }
}

/// Decoded contract event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub kind: EventKind,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u64,
    pub asset_id: AssetId,
    pub owner: String,
    pub token_uri: String,
}
