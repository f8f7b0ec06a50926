//! Transfer lifecycle events
//!
//! Every transition, retry and failure is published to an [`EventSink`].

use std::fmt;

use tracing::{info, warn};

use crate::chain::TxRef;
use crate::core_types::{AssetId, TransferId};

use super::state::TransferStage;
use super::types::TransferRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEventKind {
    Created,
    Advanced,
    Retrying,
    Failed,
    Completed,
}

impl TransferEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferEventKind::Created => "created",
            TransferEventKind::Advanced => "advanced",
            TransferEventKind::Retrying => "retrying",
            TransferEventKind::Failed => "failed",
            TransferEventKind::Completed => "completed",
        }
    }
}

impl fmt::Display for TransferEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub transfer_id: TransferId,
    pub asset_id: AssetId,
    pub kind: TransferEventKind,
    pub stage: TransferStage,
    /// Most recent transaction of the record, if any
    pub tx: Option<TxRef>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl TransferEvent {
    /// Snapshot of `record` after a persisted change
    pub fn from_record(kind: TransferEventKind, record: &TransferRecord) -> Self {
        Self {
            transfer_id: record.transfer_id,
            asset_id: record.asset_id,
            kind,
            stage: record.stage,
            tx: record.mint_tx.clone().or_else(|| record.lock_tx.clone()),
            attempts: record.attempts,
            error: record.last_error.clone(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: TransferEvent);
}

/// Writes events as structured `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TransferEvent) {
        let tx_hash = event.tx.as_ref().map(|t| t.hash.as_str()).unwrap_or("-");
        match event.kind {
            TransferEventKind::Retrying | TransferEventKind::Failed => warn!(
                transfer_id = %event.transfer_id,
                asset_id = %event.asset_id,
                stage = %event.stage,
                tx_hash = tx_hash,
                attempts = event.attempts,
                error = event.error.as_deref().unwrap_or(""),
                "transfer {}",
                event.kind
            ),
            _ => info!(
                transfer_id = %event.transfer_id,
                asset_id = %event.asset_id,
                stage = %event.stage,
                tx_hash = tx_hash,
                "transfer {}",
                event.kind
            ),
        }
    }
}

/// Captures events in memory for assertions
#[cfg(any(test, feature = "mock-chain"))]
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<TransferEvent>>,
}

#[cfg(any(test, feature = "mock-chain"))]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, asset_id: AssetId) -> Vec<TransferEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.asset_id == asset_id)
            .collect()
    }
}

#[cfg(any(test, feature = "mock-chain"))]
impl EventSink for MemorySink {
    fn emit(&self, event: TransferEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::types::Transition;

    #[test]
    fn test_event_snapshot_prefers_mint_tx() {
        let mut record = TransferRecord::new(AssetId::new(5));
        record
            .apply(Transition::LockSubmitted(TxRef::new("polygon", "0x01")))
            .unwrap();

        let event = TransferEvent::from_record(TransferEventKind::Advanced, &record);
        assert_eq!(event.stage, TransferStage::LockSubmitted);
        assert_eq!(event.tx.map(|t| t.hash), Some("0x01".to_string()));
    }

    #[test]
    fn test_memory_sink_filters_by_asset() {
        let sink = MemorySink::new();
        sink.emit(TransferEvent::from_record(
            TransferEventKind::Created,
            &TransferRecord::new(AssetId::new(1)),
        ));
        sink.emit(TransferEvent::from_record(
            TransferEventKind::Created,
            &TransferRecord::new(AssetId::new(2)),
        ));
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_for(AssetId::new(2)).len(), 1);
    }
}
