//! Transfer FSM Stage Definitions
//!
//! Stage IDs are stored as SMALLINT in PostgreSQL. Forward stages have
//! increasing IDs, so "no regression" is a numeric comparison.

use std::fmt;

/// Transfer FSM stages
///
/// Terminal stages: MINT_CONFIRMED (50), FAILED (-10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferStage {
    /// Record exists, nothing sent to either chain yet
    Created = 0,

    /// Lock transaction accepted by the source node
    LockSubmitted = 10,

    /// Lock buried at the source confirmation depth
    /// CRITICAL: from here on the asset is locked and must be minted
    LockConfirmed = 20,

    /// Owner and token URI read from the lock event
    ProofExtracted = 30,

    /// Mint transaction accepted by the destination node
    MintSubmitted = 40,

    /// Terminal: bridged asset minted and confirmed
    MintConfirmed = 50,

    /// Terminal: gave up, see `last_error`
    Failed = -10,
}

impl TransferStage {
    /// Forward stages in lifecycle order
    pub const LIFECYCLE: [TransferStage; 6] = [
        TransferStage::Created,
        TransferStage::LockSubmitted,
        TransferStage::LockConfirmed,
        TransferStage::ProofExtracted,
        TransferStage::MintSubmitted,
        TransferStage::MintConfirmed,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStage::MintConfirmed | TransferStage::Failed)
    }

    /// Asset is locked on the source chain but not yet minted
    #[inline]
    pub fn is_asset_locked(&self) -> bool {
        matches!(
            self,
            TransferStage::LockConfirmed
                | TransferStage::ProofExtracted
                | TransferStage::MintSubmitted
        )
    }

    /// Whether a persisted record may move from `self` to `next`.
    ///
    /// Staying in place is allowed (retry bookkeeping); terminal stages are
    /// frozen; FAILED is reachable from any live stage.
    pub fn can_transition_to(&self, next: TransferStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TransferStage::Failed => true,
            _ => next.id() >= self.id(),
        }
    }

    /// The stage a successful step moves to
    pub fn next(&self) -> Option<TransferStage> {
        match self {
            TransferStage::Created => Some(TransferStage::LockSubmitted),
            TransferStage::LockSubmitted => Some(TransferStage::LockConfirmed),
            TransferStage::LockConfirmed => Some(TransferStage::ProofExtracted),
            TransferStage::ProofExtracted => Some(TransferStage::MintSubmitted),
            TransferStage::MintSubmitted => Some(TransferStage::MintConfirmed),
            TransferStage::MintConfirmed | TransferStage::Failed => None,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStage::Created),
            10 => Some(TransferStage::LockSubmitted),
            20 => Some(TransferStage::LockConfirmed),
            30 => Some(TransferStage::ProofExtracted),
            40 => Some(TransferStage::MintSubmitted),
            50 => Some(TransferStage::MintConfirmed),
            -10 => Some(TransferStage::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStage::Created => "CREATED",
            TransferStage::LockSubmitted => "LOCK_SUBMITTED",
            TransferStage::LockConfirmed => "LOCK_CONFIRMED",
            TransferStage::ProofExtracted => "PROOF_EXTRACTED",
            TransferStage::MintSubmitted => "MINT_SUBMITTED",
            TransferStage::MintConfirmed => "MINT_CONFIRMED",
            TransferStage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStage {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStage::from_id(value).ok_or(())
    }
}
