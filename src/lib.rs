//! NFT Bridge Relay - lock on one chain, mint on another
//!
//! Crash-safe relay that moves an NFT from a source chain to a destination
//! chain through a persisted state machine.
//!
//! # Modules
//!
//! - [`core_types`] - Core identifiers (AssetId, TransferId)
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema
//! - [`chain`] - Chain client abstraction, EVM JSON-RPC client, mock client
//! - [`bridge`] - Transfer FSM, fee policy, ledger, recovery

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod db;
pub mod logging;

pub mod bridge;
pub mod chain;

// Convenient re-exports at crate root
pub use bridge::{
    BridgeError, RecoveryScanner, TransferLedger, TransferOrchestrator, TransferPool,
    TransferRecord, TransferStage,
};
pub use chain::{ChainClient, ChainError, EvmChainClient};
pub use config::AppConfig;
pub use core_types::{AssetId, TransferId};
