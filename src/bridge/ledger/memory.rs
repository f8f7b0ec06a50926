//! In-memory ledger
//!
//! Same-asset `create`/`save` run under the DashMap shard lock of that
//! asset's entry, so the version check and the write are one step. Nothing
//! survives a restart.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core_types::AssetId;

use super::TransferLedger;
use crate::bridge::error::BridgeError;
use crate::bridge::types::TransferRecord;

#[derive(Debug)]
struct Stored {
    /// Global insertion order
    seq: u64,
    record: TransferRecord,
}

/// Records per asset, in creation order
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: DashMap<AssetId, Vec<Stored>>,
    next_seq: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full history of an asset, oldest first
    pub fn history(&self, asset_id: AssetId) -> Vec<TransferRecord> {
        self.records
            .get(&asset_id)
            .map(|r| r.iter().map(|s| s.record.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TransferLedger for MemoryLedger {
    async fn create(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        let mut entry = self.records.entry(asset_id).or_default();
        if entry.iter().any(|s| !s.record.stage.is_terminal()) {
            return Err(BridgeError::AlreadyInFlight(asset_id));
        }
        let record = TransferRecord::new(asset_id);
        entry.push(Stored {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            record: record.clone(),
        });
        Ok(record)
    }

    async fn load(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        self.records
            .get(&asset_id)
            .and_then(|r| r.last().map(|s| s.record.clone()))
            .ok_or_else(|| BridgeError::TransferNotFound(format!("asset {}", asset_id)))
    }

    async fn save(&self, record: &mut TransferRecord) -> Result<(), BridgeError> {
        let mut entry = self.records.get_mut(&record.asset_id).ok_or_else(|| {
            BridgeError::TransferNotFound(record.transfer_id.to_string())
        })?;
        let stored = entry
            .iter_mut()
            .map(|s| &mut s.record)
            .find(|r| r.transfer_id == record.transfer_id)
            .ok_or_else(|| BridgeError::TransferNotFound(record.transfer_id.to_string()))?;

        if !stored.stage.can_transition_to(record.stage) {
            return Err(BridgeError::InvalidStateTransition(format!(
                "{}: stored {} cannot move to {}",
                record.transfer_id, stored.stage, record.stage
            )));
        }
        if stored.version != record.version {
            return Err(BridgeError::ConcurrentModification(format!(
                "{}: stored version {}, written from version {}",
                record.transfer_id, stored.version, record.version
            )));
        }
        record.version += 1;
        *stored = record.clone();
        Ok(())
    }

    async fn list_non_terminal(&self) -> Result<Vec<TransferRecord>, BridgeError> {
        let mut live: Vec<(u64, TransferRecord)> = self
            .records
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|s| !s.record.stage.is_terminal())
                    .map(|s| (s.seq, s.record.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        live.sort_by_key(|(seq, _)| *seq);
        Ok(live.into_iter().map(|(_, record)| record).collect())
    }
}
