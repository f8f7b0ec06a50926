//! Transfer Pool
//!
//! One tokio task per transfer, bounded by a semaphore. Submitting waits
//! for a permit when the pool is full; requests are never dropped.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::core_types::AssetId;

use super::coordinator::TransferOrchestrator;
use super::error::BridgeError;
use super::types::TransferRecord;

pub type TransferOutcome = (AssetId, Result<TransferRecord, BridgeError>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Transfer,
    Resume,
}

pub struct TransferPool {
    orchestrator: Arc<TransferOrchestrator>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TransferPool {
    pub fn new(orchestrator: Arc<TransferOrchestrator>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Bridge every asset, at most `max_concurrent` at a time.
    /// Outcomes are returned in completion order.
    pub async fn transfer_all(
        &self,
        assets: impl IntoIterator<Item = AssetId>,
    ) -> Vec<TransferOutcome> {
        self.run(assets, Mode::Transfer).await
    }

    /// Resume the latest record of every asset
    pub async fn resume_all(
        &self,
        assets: impl IntoIterator<Item = AssetId>,
    ) -> Vec<TransferOutcome> {
        self.run(assets, Mode::Resume).await
    }

    async fn run(
        &self,
        assets: impl IntoIterator<Item = AssetId>,
        mode: Mode,
    ) -> Vec<TransferOutcome> {
        let mut join_set = JoinSet::new();

        for asset_id in assets {
            // Acquire before spawning so a full pool pushes back on the caller
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(asset_id = %asset_id, error = %e, "Transfer pool closed");
                    break;
                }
            };
            let orchestrator = Arc::clone(&self.orchestrator);

            debug!(asset_id = %asset_id, ?mode, "Spawning transfer task");
            join_set.spawn(async move {
                let _permit = permit;
                let result = match mode {
                    Mode::Transfer => orchestrator.transfer(asset_id).await,
                    Mode::Resume => orchestrator.resume(asset_id).await,
                };
                (asset_id, result)
            });
        }

        let mut outcomes = Vec::with_capacity(join_set.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Transfer task panicked or was cancelled"),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::coordinator::OrchestratorConfig;
    use crate::bridge::fee::FeeEstimator;
    use crate::bridge::ledger::MemoryLedger;
    use crate::bridge::state::TransferStage;
    use crate::chain::mock::MockChainClient;
    use crate::config::{FeePolicy, RetryPolicy};
    use std::time::Duration;

    fn orchestrator(
        source: Arc<MockChainClient>,
        destination: Arc<MockChainClient>,
    ) -> TransferOrchestrator {
        TransferOrchestrator::with_estimators(
            Arc::new(MemoryLedger::new()),
            source.clone(),
            destination.clone(),
            FeeEstimator::with_policy(source, FeePolicy::default(), "MATIC"),
            FeeEstimator::with_policy(destination, FeePolicy::default(), "ETH"),
            OrchestratorConfig {
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_backoff_ms: 1,
                    max_backoff_ms: 1,
                },
                confirmation_timeout: Duration::from_secs(1),
                relay_id: "relay-pool".to_string(),
                lease_ttl: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn test_distinct_assets_all_complete() {
        let source = Arc::new(MockChainClient::new("polygon"));
        let destination = Arc::new(MockChainClient::new("sepolia"));
        source.set_lock_proof("0xabc", "ipfs://xyz");
        let pool = TransferPool::new(Arc::new(orchestrator(source, destination.clone())), 2);

        let outcomes = pool.transfer_all((1..=5).map(AssetId::new)).await;
        assert_eq!(outcomes.len(), 5);
        for (asset_id, result) in outcomes {
            let record = result.unwrap();
            assert_eq!(record.asset_id, asset_id);
            assert_eq!(record.stage, TransferStage::MintConfirmed);
        }
        assert_eq!(destination.submit_count(), 5);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let source = Arc::new(MockChainClient::new("polygon"));
        let destination = Arc::new(MockChainClient::new("sepolia"));
        let pool = TransferPool::new(Arc::new(orchestrator(source, destination)), 0);
        assert_eq!(pool.max_concurrent(), 1);
    }
}
