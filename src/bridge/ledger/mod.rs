//! Transfer Ledger
//!
//! Durable map from asset id to transfer records. The ledger is the single
//! writer for an asset: `create` refuses a second live record, `save`
//! refuses any stage regression and any write from a stale copy, and
//! `claim` hands the record to one relay at a time.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;

use crate::core_types::{AssetId, now_ms};

use super::error::BridgeError;
use super::types::TransferRecord;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

#[async_trait]
pub trait TransferLedger: Send + Sync {
    /// Insert a fresh CREATED record.
    ///
    /// Fails with `AlreadyInFlight` while the asset has a non-terminal record.
    async fn create(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError>;

    /// Latest record for the asset
    async fn load(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError>;

    /// Persist `record`, replacing the stored copy with the same transfer id.
    ///
    /// Rejects moves out of a terminal stage or to an earlier stage with
    /// `InvalidStateTransition`, and a copy whose `version` no longer matches
    /// the stored one with `ConcurrentModification`. On success the version
    /// is bumped in both the store and `record`.
    async fn save(&self, record: &mut TransferRecord) -> Result<(), BridgeError>;

    /// Take the drive lease on the latest record of `asset_id` for `owner`.
    ///
    /// Terminal records are returned without a lease. A live lease of
    /// another relay, or losing the race to write one, is `AlreadyInFlight`.
    /// `owner` may re-take its own lease at any time.
    async fn claim(
        &self,
        asset_id: AssetId,
        owner: &str,
        ttl: Duration,
    ) -> Result<TransferRecord, BridgeError> {
        let mut record = self.load(asset_id).await?;
        if record.stage.is_terminal() {
            return Ok(record);
        }

        let now = now_ms();
        if record.leased_to_other(owner, now) {
            return Err(BridgeError::AlreadyInFlight(asset_id));
        }
        record.set_lease(owner, now, ttl);
        match self.save(&mut record).await {
            Ok(()) => Ok(record),
            Err(BridgeError::ConcurrentModification(_)) => {
                Err(BridgeError::AlreadyInFlight(asset_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Every record not yet in a terminal stage, oldest first
    async fn list_non_terminal(&self) -> Result<Vec<TransferRecord>, BridgeError>;
}
