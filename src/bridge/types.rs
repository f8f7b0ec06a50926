//! Transfer Core Types
//!
//! `TransferRecord` is the unit of work and of persistence. All mutations go
//! through [`TransferRecord::apply`], which enforces stage ordering and the
//! proof-before-mint invariant before anything reaches the ledger.

use std::time::Duration;

use crate::chain::TxRef;
use crate::core_types::{AssetId, TimestampMs, TransferId, now_ms};

use super::error::BridgeError;
use super::state::TransferStage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub asset_id: AssetId,
    pub stage: TransferStage,
    pub lock_tx: Option<TxRef>,
    pub mint_tx: Option<TxRef>,
    pub owner_address: Option<String>,
    pub token_uri: Option<String>,
    /// Failed attempts at the current stage
    pub attempts: u32,
    /// `"<CODE>: <message>"` of the most recent failure
    pub last_error: Option<String>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
    /// Bumped by the ledger on every successful save
    pub version: u64,
    /// Relay holding the drive lease
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<TimestampMs>,
}

/// One persisted change to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    LockSubmitted(TxRef),
    /// Lock tx with its inclusion block filled in
    LockConfirmed(TxRef),
    ProofExtracted { owner: String, token_uri: String },
    MintSubmitted(TxRef),
    MintConfirmed(TxRef),
    /// Failed attempt, stage unchanged
    Retry { error: String },
    Fail { error: String },
}

impl Transition {
    pub fn target(&self, current: TransferStage) -> TransferStage {
        match self {
            Transition::LockSubmitted(_) => TransferStage::LockSubmitted,
            Transition::LockConfirmed(_) => TransferStage::LockConfirmed,
            Transition::ProofExtracted { .. } => TransferStage::ProofExtracted,
            Transition::MintSubmitted(_) => TransferStage::MintSubmitted,
            Transition::MintConfirmed(_) => TransferStage::MintConfirmed,
            Transition::Retry { .. } => current,
            Transition::Fail { .. } => TransferStage::Failed,
        }
    }
}

impl TransferRecord {
    pub fn new(asset_id: AssetId) -> Self {
        let now = now_ms();
        Self {
            transfer_id: TransferId::new(),
            asset_id,
            stage: TransferStage::Created,
            lock_tx: None,
            mint_tx: None,
            owner_address: None,
            token_uri: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            version: 0,
            lease_owner: None,
            lease_expires_at: None,
        }
    }

    /// True while a relay other than `owner` holds an unexpired lease
    pub fn leased_to_other(&self, owner: &str, now: TimestampMs) -> bool {
        match (&self.lease_owner, self.lease_expires_at) {
            (Some(holder), Some(expires_at)) => holder != owner && expires_at > now,
            _ => false,
        }
    }

    pub fn set_lease(&mut self, owner: &str, now: TimestampMs, ttl: Duration) {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.lease_owner = Some(owner.to_string());
        self.lease_expires_at = Some(now.saturating_add(ttl_ms));
    }

    pub fn clear_lease(&mut self) {
        self.lease_owner = None;
        self.lease_expires_at = None;
    }

    /// Proof payload, present from PROOF_EXTRACTED on
    pub fn proof(&self) -> Option<(&str, &str)> {
        match (&self.owner_address, &self.token_uri) {
            (Some(owner), Some(uri)) => Some((owner.as_str(), uri.as_str())),
            _ => None,
        }
    }

    /// Apply `transition` in place.
    ///
    /// Stage advances reset `attempts` and `last_error`. A rejected
    /// transition leaves the record untouched.
    pub fn apply(&mut self, transition: Transition) -> Result<(), BridgeError> {
        let next = transition.target(self.stage);
        let expected = match &transition {
            Transition::Retry { .. } | Transition::Fail { .. } => next,
            _ => self.stage.next().unwrap_or(self.stage),
        };
        if !self.stage.can_transition_to(next) || next != expected {
            return Err(BridgeError::InvalidStateTransition(format!(
                "{} cannot move {} -> {}",
                self.transfer_id, self.stage, next
            )));
        }

        match transition {
            Transition::LockSubmitted(tx) => self.lock_tx = Some(tx),
            Transition::LockConfirmed(tx) => self.lock_tx = Some(tx),
            Transition::ProofExtracted { owner, token_uri } => {
                self.owner_address = Some(owner);
                self.token_uri = Some(token_uri);
            }
            Transition::MintSubmitted(tx) | Transition::MintConfirmed(tx) => {
                if self.lock_tx.is_none() || self.proof().is_none() {
                    return Err(BridgeError::InvalidStateTransition(format!(
                        "{} has no lock proof, refusing mint",
                        self.transfer_id
                    )));
                }
                self.mint_tx = Some(tx);
            }
            Transition::Retry { error } => {
                self.attempts = self.attempts.saturating_add(1);
                self.last_error = Some(error);
            }
            Transition::Fail { error } => {
                self.last_error = Some(error);
            }
        }

        if next != self.stage {
            if next != TransferStage::Failed {
                self.attempts = 0;
                self.last_error = None;
            }
            self.stage = next;
        }
        self.updated_at = now_ms();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(hash: &str) -> TxRef {
        TxRef::new("test", hash)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut record = TransferRecord::new(AssetId::new(42));
        record.apply(Transition::LockSubmitted(tx("0x01"))).unwrap();
        record
            .apply(Transition::LockConfirmed(tx("0x01").confirmed_at(7)))
            .unwrap();
        record
            .apply(Transition::ProofExtracted {
                owner: "0xabc".into(),
                token_uri: "ipfs://xyz".into(),
            })
            .unwrap();
        record.apply(Transition::MintSubmitted(tx("0x02"))).unwrap();
        record
            .apply(Transition::MintConfirmed(tx("0x02").confirmed_at(9)))
            .unwrap();

        assert_eq!(record.stage, TransferStage::MintConfirmed);
        assert_eq!(record.lock_tx.as_ref().and_then(|t| t.block), Some(7));
        assert_eq!(record.proof(), Some(("0xabc", "ipfs://xyz")));
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let mut record = TransferRecord::new(AssetId::new(1));
        let before = record.clone();
        let err = record
            .apply(Transition::MintSubmitted(tx("0x02")))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
        assert_eq!(record, before);
    }

    #[test]
    fn test_retry_counts_and_advance_resets() {
        let mut record = TransferRecord::new(AssetId::new(1));
        record
            .apply(Transition::Retry {
                error: "RPC_ERROR: down".into(),
            })
            .unwrap();
        record
            .apply(Transition::Retry {
                error: "RPC_ERROR: still down".into(),
            })
            .unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.stage, TransferStage::Created);

        record.apply(Transition::LockSubmitted(tx("0x01"))).unwrap();
        assert_eq!(record.attempts, 0);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn test_lease_ownership_and_expiry() {
        let mut record = TransferRecord::new(AssetId::new(1));
        assert!(!record.leased_to_other("relay-a", 1_000));

        record.set_lease("relay-a", 1_000, Duration::from_secs(5));
        assert_eq!(record.lease_expires_at, Some(6_000));
        assert!(!record.leased_to_other("relay-a", 2_000));
        assert!(record.leased_to_other("relay-b", 2_000));
        // Expired leases bind nobody
        assert!(!record.leased_to_other("relay-b", 6_000));

        record.clear_lease();
        assert!(!record.leased_to_other("relay-b", 2_000));
    }

    #[test]
    fn test_failed_is_frozen() {
        let mut record = TransferRecord::new(AssetId::new(1));
        record
            .apply(Transition::Fail {
                error: "FEE_TOO_HIGH: too much".into(),
            })
            .unwrap();
        assert_eq!(record.stage, TransferStage::Failed);
        assert_eq!(record.last_error.as_deref(), Some("FEE_TOO_HIGH: too much"));

        assert!(record.apply(Transition::LockSubmitted(tx("0x01"))).is_err());
        assert!(
            record
                .apply(Transition::Retry { error: "x".into() })
                .is_err()
        );
    }
}
