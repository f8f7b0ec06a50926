//! Recovery Scanner
//!
//! Resumes every non-terminal transfer found in the ledger: once at startup
//! and then periodically. Records already being driven by another task are
//! skipped, not raced.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::RecoveryConfig;

use super::error::BridgeError;
use super::pool::TransferPool;
use super::state::TransferStage;

/// Configuration for the recovery scanner
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for unfinished transfers
    pub scan_interval: Duration,
    /// Maximum transfers to resume per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

impl From<&RecoveryConfig> for WorkerConfig {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            scan_interval: Duration::from_millis(config.scan_interval_ms),
            batch_size: config.batch_size.max(1),
        }
    }
}

/// Outcome counts of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-terminal records found
    pub scanned: usize,
    pub completed: usize,
    pub failed: usize,
    /// Resumed but stopped by a ledger error; picked up next scan
    pub still_pending: usize,
    /// Driven elsewhere or beyond the batch size
    pub skipped: usize,
}

pub struct RecoveryScanner {
    pool: Arc<TransferPool>,
    config: WorkerConfig,
}

impl RecoveryScanner {
    pub fn new(pool: Arc<TransferPool>, config: WorkerConfig) -> Self {
        Self { pool, config }
    }

    pub fn with_defaults(pool: Arc<TransferPool>) -> Self {
        Self::new(pool, WorkerConfig::default())
    }

    /// Run the scanner loop forever, starting with an immediate scan
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting recovery scanner"
        );

        loop {
            if let Err(e) = self.recover_once().await {
                error!(error = %e, code = e.code(), "Recovery scan failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Resume every non-terminal record once
    pub async fn recover_once(&self) -> Result<RecoveryReport, BridgeError> {
        let live = self
            .pool
            .orchestrator()
            .ledger()
            .list_non_terminal()
            .await?;

        let mut report = RecoveryReport {
            scanned: live.len(),
            ..Default::default()
        };
        if live.is_empty() {
            debug!("No unfinished transfers found");
            return Ok(report);
        }

        info!(count = live.len(), "Found unfinished transfers to recover");

        for record in &live {
            if record.stage.is_asset_locked() && record.attempts > 0 {
                warn!(
                    asset_id = %record.asset_id,
                    transfer_id = %record.transfer_id,
                    stage = %record.stage,
                    attempts = record.attempts,
                    "Asset locked on source but not minted yet"
                );
            }
        }

        let batch = live.len().min(self.config.batch_size);
        report.skipped = live.len() - batch;
        let assets = live.iter().take(batch).map(|r| r.asset_id);

        for (asset_id, result) in self.pool.resume_all(assets).await {
            match result {
                Ok(record) if record.stage == TransferStage::MintConfirmed => {
                    report.completed += 1
                }
                Ok(record) if record.stage == TransferStage::Failed => report.failed += 1,
                Ok(_) => report.still_pending += 1,
                Err(BridgeError::AlreadyInFlight(_)) => {
                    debug!(asset_id = %asset_id, "Transfer driven elsewhere, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(
                        asset_id = %asset_id,
                        error = %e,
                        code = e.code(),
                        "Failed to recover transfer"
                    );
                    report.still_pending += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            completed = report.completed,
            failed = report.failed,
            still_pending = report.still_pending,
            skipped = report.skipped,
            "Recovery scan finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_from_recovery_config() {
        let config = WorkerConfig::from(&RecoveryConfig {
            scan_interval_ms: 1_500,
            batch_size: 0,
        });
        assert_eq!(config.scan_interval, Duration::from_millis(1_500));
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_default_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 100);
    }
}
