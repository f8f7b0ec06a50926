//! Transfer Orchestrator
//!
//! Drives one asset at a time through the lock-and-mint FSM. Every step
//! performs a single chain operation and persists its outcome before the
//! next one starts, so a crash loses at most the operation in flight and
//! recovery resumes from the last persisted stage.
//!
//! Before touching a chain the orchestrator claims the record in the ledger
//! under its `relay_id`. The lease is renewed on every save, so another
//! relay sharing the ledger gets `AlreadyInFlight` instead of a second mint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, ContractCall, EventFilter, TxRef};
use crate::config::{BridgeConfig, RetryPolicy};
use crate::core_types::{AssetId, now_ms};

use super::error::BridgeError;
use super::events::{EventSink, TracingSink, TransferEvent, TransferEventKind};
use super::fee::FeeEstimator;
use super::ledger::TransferLedger;
use super::state::TransferStage;
use super::types::{TransferRecord, Transition};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retry: RetryPolicy,
    /// Upper bound of every `await_confirmation` call
    pub confirmation_timeout: Duration,
    /// Owner name of the ledger leases this orchestrator takes
    pub relay_id: String,
    pub lease_ttl: Duration,
}

impl From<&BridgeConfig> for OrchestratorConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            confirmation_timeout: config.confirmation_timeout(),
            relay_id: config.relay_id.clone(),
            lease_ttl: config.lease_ttl(),
        }
    }
}

/// In-process guard: at most one task drives an asset at a time.
/// Across processes the ledger lease does the same job.
struct DriveLease<'a> {
    leases: &'a DashSet<AssetId>,
    asset_id: AssetId,
}

impl Drop for DriveLease<'_> {
    fn drop(&mut self) {
        self.leases.remove(&self.asset_id);
    }
}

pub struct TransferOrchestrator {
    ledger: Arc<dyn TransferLedger>,
    source: Arc<dyn ChainClient>,
    destination: Arc<dyn ChainClient>,
    source_fees: FeeEstimator,
    destination_fees: FeeEstimator,
    events: Arc<dyn EventSink>,
    config: OrchestratorConfig,
    leases: DashSet<AssetId>,
}

impl TransferOrchestrator {
    pub fn new(
        ledger: Arc<dyn TransferLedger>,
        source: Arc<dyn ChainClient>,
        destination: Arc<dyn ChainClient>,
        config: &BridgeConfig,
    ) -> Self {
        let source_fees = FeeEstimator::new(source.clone(), &config.source);
        let destination_fees = FeeEstimator::new(destination.clone(), &config.destination);
        Self::with_estimators(
            ledger,
            source,
            destination,
            source_fees,
            destination_fees,
            OrchestratorConfig::from(config),
        )
    }

    pub fn with_estimators(
        ledger: Arc<dyn TransferLedger>,
        source: Arc<dyn ChainClient>,
        destination: Arc<dyn ChainClient>,
        source_fees: FeeEstimator,
        destination_fees: FeeEstimator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            ledger,
            source,
            destination,
            source_fees,
            destination_fees,
            events: Arc::new(TracingSink),
            config,
            leases: DashSet::new(),
        }
    }

    /// Publish lifecycle events to `sink` instead of the log
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn TransferLedger> {
        &self.ledger
    }

    /// Bridge `asset_id` and drive it to a terminal stage.
    ///
    /// A previously completed transfer is returned as is. A FAILED record
    /// does not block a new attempt; a live record does.
    pub async fn transfer(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        let _lease = self.acquire(asset_id)?;

        match self.ledger.load(asset_id).await {
            Ok(existing) if existing.stage == TransferStage::MintConfirmed => {
                debug!(
                    asset_id = %asset_id,
                    transfer_id = %existing.transfer_id,
                    "Asset already bridged"
                );
                return Ok(existing);
            }
            Ok(existing) if !existing.stage.is_terminal() => {
                return Err(BridgeError::AlreadyInFlight(asset_id));
            }
            Ok(_) | Err(BridgeError::TransferNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let created = self.ledger.create(asset_id).await?;
        info!(
            asset_id = %asset_id,
            transfer_id = %created.transfer_id,
            "Transfer created"
        );
        self.emit(TransferEventKind::Created, &created);

        let record = self.claim(asset_id).await?;
        self.drive(record).await
    }

    /// Drive the latest record of `asset_id` from its persisted stage
    pub async fn resume(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        let _lease = self.acquire(asset_id)?;
        let record = self.claim(asset_id).await?;
        if !record.stage.is_terminal() {
            info!(
                asset_id = %asset_id,
                transfer_id = %record.transfer_id,
                stage = %record.stage,
                attempts = record.attempts,
                "Resuming transfer"
            );
        }
        self.drive(record).await
    }

    /// Perform exactly one transition attempt and persist its outcome.
    ///
    /// The ledger lease is released afterwards so any relay may take the
    /// next step.
    pub async fn step(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        let _lease = self.acquire(asset_id)?;
        let record = self.claim(asset_id).await?;
        let mut record = self.advance(record).await?;
        if record.lease_owner.is_some() {
            record.clear_lease();
            self.ledger.save(&mut record).await?;
        }
        Ok(record)
    }

    /// Latest persisted record
    pub async fn status(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        self.ledger.load(asset_id).await
    }

    fn acquire(&self, asset_id: AssetId) -> Result<DriveLease<'_>, BridgeError> {
        if !self.leases.insert(asset_id) {
            debug!(asset_id = %asset_id, "Asset is being driven by another task");
            return Err(BridgeError::AlreadyInFlight(asset_id));
        }
        Ok(DriveLease {
            leases: &self.leases,
            asset_id,
        })
    }

    async fn claim(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        let record = self
            .ledger
            .claim(asset_id, &self.config.relay_id, self.config.lease_ttl)
            .await;
        if let Err(BridgeError::AlreadyInFlight(_)) = &record {
            debug!(
                asset_id = %asset_id,
                relay_id = %self.config.relay_id,
                "Asset is leased to another relay"
            );
        }
        record
    }

    /// Save `record`, renewing our lease or dropping it once terminal
    async fn persist(&self, record: &mut TransferRecord) -> Result<(), BridgeError> {
        if record.stage.is_terminal() {
            record.clear_lease();
        } else {
            record.set_lease(&self.config.relay_id, now_ms(), self.config.lease_ttl);
        }
        self.ledger.save(record).await
    }

    /// Step until terminal, backing off between transient failures
    async fn drive(&self, mut record: TransferRecord) -> Result<TransferRecord, BridgeError> {
        while !record.stage.is_terminal() {
            let stage_before = record.stage;
            record = self.advance(record).await?;

            if record.stage == stage_before && record.attempts > 0 {
                let delay = self.config.retry.backoff(record.attempts);
                debug!(
                    transfer_id = %record.transfer_id,
                    stage = %record.stage,
                    attempts = record.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
        Ok(record)
    }

    /// One transition attempt. Chain failures are written to the record;
    /// ledger failures are returned and leave the stored record untouched.
    async fn advance(&self, mut record: TransferRecord) -> Result<TransferRecord, BridgeError> {
        let outcome = match record.stage {
            TransferStage::Created => self.submit_lock(&record).await,
            TransferStage::LockSubmitted => self.confirm_lock(&record).await,
            TransferStage::LockConfirmed => self.extract_proof(&record).await,
            TransferStage::ProofExtracted => self.submit_mint(&record).await,
            TransferStage::MintSubmitted => self.confirm_mint(&record).await,
            TransferStage::MintConfirmed | TransferStage::Failed => return Ok(record),
        };

        match outcome {
            Ok(transition) => {
                record.apply(transition)?;
                self.persist(&mut record).await?;

                let kind = if record.stage == TransferStage::MintConfirmed {
                    info!(
                        asset_id = %record.asset_id,
                        transfer_id = %record.transfer_id,
                        "Transfer complete"
                    );
                    TransferEventKind::Completed
                } else {
                    TransferEventKind::Advanced
                };
                self.emit(kind, &record);
                Ok(record)
            }
            Err(e) if e.fails_transfer() => self.record_failure(record, e).await,
            Err(e) => Err(e),
        }
    }

    async fn record_failure(
        &self,
        mut record: TransferRecord,
        err: BridgeError,
    ) -> Result<TransferRecord, BridgeError> {
        if !err.is_transient() {
            error!(
                asset_id = %record.asset_id,
                transfer_id = %record.transfer_id,
                stage = %record.stage,
                code = err.code(),
                error = %err,
                "Transfer failed"
            );
            record.apply(Transition::Fail {
                error: err.to_record_string(),
            })?;
            self.persist(&mut record).await?;
            self.emit(TransferEventKind::Failed, &record);
            return Ok(record);
        }

        record.apply(Transition::Retry {
            error: err.to_record_string(),
        })?;

        if record.attempts >= self.config.retry.max_attempts {
            let exhausted = BridgeError::RetryBudgetExhausted {
                attempts: record.attempts,
                last: err.to_record_string(),
            };
            error!(
                asset_id = %record.asset_id,
                transfer_id = %record.transfer_id,
                stage = %record.stage,
                attempts = record.attempts,
                error = %err,
                "Retry budget exhausted"
            );
            record.apply(Transition::Fail {
                error: exhausted.to_record_string(),
            })?;
            self.persist(&mut record).await?;
            self.emit(TransferEventKind::Failed, &record);
            return Ok(record);
        }

        warn!(
            asset_id = %record.asset_id,
            transfer_id = %record.transfer_id,
            stage = %record.stage,
            attempts = record.attempts,
            max_attempts = self.config.retry.max_attempts,
            error = %err,
            "Transient failure, will retry"
        );
        self.persist(&mut record).await?;
        self.emit(TransferEventKind::Retrying, &record);
        Ok(record)
    }

    async fn submit_lock(&self, record: &TransferRecord) -> Result<Transition, BridgeError> {
        let call = ContractCall::Lock {
            asset_id: record.asset_id,
        };
        let fee = self.source_fees.estimate(&call).await?;
        let tx = self.source.submit(&call, &fee).await?;

        info!(
            asset_id = %record.asset_id,
            transfer_id = %record.transfer_id,
            tx_hash = %tx.hash,
            "Lock submitted"
        );
        Ok(Transition::LockSubmitted(tx))
    }

    async fn confirm_lock(&self, record: &TransferRecord) -> Result<Transition, BridgeError> {
        let tx = required(&record.lock_tx, record, "lock_tx")?;
        let confirmed = self.confirm(self.source.as_ref(), tx, record, "Lock").await?;
        Ok(Transition::LockConfirmed(confirmed))
    }

    /// Read owner and token URI from the `Locked` event of our own lock tx
    async fn extract_proof(&self, record: &TransferRecord) -> Result<Transition, BridgeError> {
        let tx = required(&record.lock_tx, record, "lock_tx")?;
        let block = tx.block.ok_or_else(|| {
            BridgeError::SystemError(format!(
                "{}: confirmed lock has no inclusion block",
                record.transfer_id
            ))
        })?;

        let events = self
            .source
            .query_events(&EventFilter::locked_in_block(record.asset_id, block))
            .await?;
        let mut ours: Vec<_> = events
            .into_iter()
            .filter(|e| e.tx_hash.eq_ignore_ascii_case(&tx.hash))
            .collect();
        ours.sort_by_key(|e| e.log_index);

        if ours.len() > 1 {
            warn!(
                asset_id = %record.asset_id,
                transfer_id = %record.transfer_id,
                tx_hash = %tx.hash,
                matches = ours.len(),
                "Multiple Locked events in lock tx, using the earliest"
            );
        }
        let event = ours
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::ProofNotFound {
                asset_id: record.asset_id,
                tx_hash: tx.hash.clone(),
            })?;

        info!(
            asset_id = %record.asset_id,
            transfer_id = %record.transfer_id,
            owner = %event.owner,
            token_uri = %event.token_uri,
            "Lock proof extracted"
        );
        Ok(Transition::ProofExtracted {
            owner: event.owner,
            token_uri: event.token_uri,
        })
    }

    async fn submit_mint(&self, record: &TransferRecord) -> Result<Transition, BridgeError> {
        let (owner, token_uri) = record.proof().ok_or_else(|| {
            BridgeError::SystemError(format!("{}: no proof to mint from", record.transfer_id))
        })?;
        let call = ContractCall::Mint {
            owner: owner.to_string(),
            asset_id: record.asset_id,
            token_uri: token_uri.to_string(),
        };
        let fee = self.destination_fees.estimate(&call).await?;
        let tx = self.destination.submit(&call, &fee).await?;

        info!(
            asset_id = %record.asset_id,
            transfer_id = %record.transfer_id,
            tx_hash = %tx.hash,
            owner = owner,
            "Mint submitted"
        );
        Ok(Transition::MintSubmitted(tx))
    }

    async fn confirm_mint(&self, record: &TransferRecord) -> Result<Transition, BridgeError> {
        let tx = required(&record.mint_tx, record, "mint_tx")?;
        let confirmed = self
            .confirm(self.destination.as_ref(), tx, record, "Mint")
            .await?;
        Ok(Transition::MintConfirmed(confirmed))
    }

    async fn confirm(
        &self,
        chain: &dyn ChainClient,
        tx: &TxRef,
        record: &TransferRecord,
        what: &str,
    ) -> Result<TxRef, BridgeError> {
        let started = Instant::now();
        let receipt = chain
            .await_confirmation(tx, self.config.confirmation_timeout)
            .await?;
        let elapsed = started.elapsed();

        info!(
            asset_id = %record.asset_id,
            transfer_id = %record.transfer_id,
            tx_hash = %tx.hash,
            block = receipt.block_number,
            confirmations = receipt.confirmations,
            elapsed_ms = elapsed.as_millis() as u64,
            "{} confirmed, time taken: {:.3}s",
            what,
            elapsed.as_secs_f64()
        );
        Ok(tx.clone().confirmed_at(receipt.block_number))
    }

    fn emit(&self, kind: TransferEventKind, record: &TransferRecord) {
        self.events.emit(TransferEvent::from_record(kind, record));
    }
}

fn required<'a>(
    tx: &'a Option<TxRef>,
    record: &TransferRecord,
    field: &str,
) -> Result<&'a TxRef, BridgeError> {
    tx.as_ref().ok_or_else(|| {
        BridgeError::SystemError(format!(
            "{} at {} has no {}",
            record.transfer_id, record.stage, field
        ))
    })
}
