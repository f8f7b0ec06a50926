use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Dispatch failed. `retryable` is set for connectivity and nonce races,
    /// cleared for calls the node rejected outright.
    #[error("Submission failed on {chain}: {reason}")]
    Submission {
        chain: String,
        reason: String,
        retryable: bool,
    },

    #[error("Confirmation of {tx_hash} timed out after {waited:?}")]
    ConfirmationTimeout { tx_hash: String, waited: Duration },

    #[error("Transaction {tx_hash} reverted")]
    ConfirmationFailed { tx_hash: String },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ChainError {
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::Submission { .. } => "SUBMISSION_ERROR",
            ChainError::ConfirmationTimeout { .. } => "CONFIRMATION_TIMEOUT",
            ChainError::ConfirmationFailed { .. } => "CONFIRMATION_FAILED",
            ChainError::Rpc(_) => "RPC_ERROR",
            ChainError::Decode(_) => "DECODE_ERROR",
        }
    }

    /// Whether retrying the same operation can change the outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Submission { retryable, .. } => *retryable,
            ChainError::ConfirmationTimeout { .. } | ChainError::Rpc(_) => true,
            ChainError::ConfirmationFailed { .. } | ChainError::Decode(_) => false,
        }
    }
}
