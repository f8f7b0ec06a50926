//! Bridge Error Types
//!
//! Every error carries a stable code. The code prefixes `last_error` on
//! persisted records, so it must never change once shipped.

use thiserror::Error;

use crate::chain::ChainError;
use crate::core_types::AssetId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // === Chain Errors ===
    #[error(transparent)]
    Chain(#[from] ChainError),

    // === Fee Errors ===
    #[error("Fee estimate on {chain} is unreliable (total {total_wei} wei)")]
    EstimationUnreliable { chain: String, total_wei: u128 },

    #[error("Fee on {chain} too high: {total_wei} wei exceeds ceiling {ceiling_wei} wei")]
    FeeTooHigh {
        chain: String,
        total_wei: u128,
        ceiling_wei: u128,
    },

    // === Proof Errors ===
    #[error("No Locked event for asset {asset_id} emitted by {tx_hash}")]
    ProofNotFound { asset_id: AssetId, tx_hash: String },

    // === Concurrency Errors ===
    #[error("Asset {0} already has a transfer in flight")]
    AlreadyInFlight(AssetId),

    #[error("Retry budget exhausted after {attempts} attempts: {last}")]
    RetryBudgetExhausted { attempts: u32, last: String },

    // === Ledger Errors ===
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Chain(e) => e.code(),
            BridgeError::EstimationUnreliable { .. } => "ESTIMATION_UNRELIABLE",
            BridgeError::FeeTooHigh { .. } => "FEE_TOO_HIGH",
            BridgeError::ProofNotFound { .. } => "PROOF_NOT_FOUND",
            BridgeError::AlreadyInFlight(_) => "ALREADY_IN_FLIGHT",
            BridgeError::RetryBudgetExhausted { .. } => "RETRY_BUDGET_EXHAUSTED",
            BridgeError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            BridgeError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            BridgeError::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            BridgeError::DatabaseError(_) => "DATABASE_ERROR",
            BridgeError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Transient errors are retried with backoff within the stage budget.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Chain(e) => e.is_transient(),
            BridgeError::EstimationUnreliable { .. } => true,
            _ => false,
        }
    }

    /// Errors that move the record to FAILED when they occur during a step.
    ///
    /// Ledger and concurrency errors are returned to the caller instead;
    /// the record stays at its last persisted stage.
    pub fn fails_transfer(&self) -> bool {
        matches!(
            self,
            BridgeError::Chain(_)
                | BridgeError::EstimationUnreliable { .. }
                | BridgeError::FeeTooHigh { .. }
                | BridgeError::ProofNotFound { .. }
                | BridgeError::RetryBudgetExhausted { .. }
        )
    }

    /// `"<CODE>: <message>"`, the form stored in `last_error`
    pub fn to_record_string(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

impl From<sqlx::Error> for BridgeError {
    fn from(e: sqlx::Error) -> Self {
        BridgeError::DatabaseError(e.to_string())
    }
}
