//! Fee Estimator
//!
//! Applies a per-chain [`FeePolicy`] to raw node estimates:
//! - total of 0 or below the floor: re-estimate exactly once, then fall back
//!   to a ceiling-priced estimate or give up with `EstimationUnreliable`
//! - total above the ceiling: `FeeTooHigh`, nothing is submitted

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::chain::{ChainClient, ContractCall, FeeEstimate};
use crate::config::{ChainConfig, FeePolicy};

use super::error::BridgeError;

const NATIVE_DECIMALS: u32 = 18;

pub struct FeeEstimator {
    client: Arc<dyn ChainClient>,
    policy: FeePolicy,
    native_symbol: String,
}

impl FeeEstimator {
    pub fn new(client: Arc<dyn ChainClient>, config: &ChainConfig) -> Self {
        Self::with_policy(client, config.fee.clone(), &config.native_symbol)
    }

    pub fn with_policy(
        client: Arc<dyn ChainClient>,
        policy: FeePolicy,
        native_symbol: &str,
    ) -> Self {
        Self {
            client,
            policy,
            native_symbol: native_symbol.to_string(),
        }
    }

    pub async fn estimate(&self, call: &ContractCall) -> Result<FeeEstimate, BridgeError> {
        let chain = self.client.chain_id();

        let mut estimate = self.client.estimate_fee(call).await?;
        if self.is_unreliable(&estimate) {
            warn!(
                chain = chain,
                call = %call,
                total_wei = %estimate.total(),
                "Unreliable fee estimate, re-estimating"
            );
            estimate = self.client.estimate_fee(call).await?;
        }

        if self.is_unreliable(&estimate) {
            if !self.policy.fallback_to_ceiling {
                return Err(BridgeError::EstimationUnreliable {
                    chain: chain.to_string(),
                    total_wei: estimate.total(),
                });
            }
            estimate = self.ceiling_estimate();
            warn!(
                chain = chain,
                call = %call,
                gas_units = estimate.gas_units,
                "Fee estimate still unreliable, falling back to ceiling"
            );
        }

        let ceiling = self.policy.ceiling_wei as u128;
        if estimate.total() > ceiling {
            return Err(BridgeError::FeeTooHigh {
                chain: chain.to_string(),
                total_wei: estimate.total(),
                ceiling_wei: ceiling,
            });
        }

        info!(
            chain = chain,
            call = %call,
            gas_units = estimate.gas_units,
            unit_price = %estimate.unit_price,
            "Estimated fee: {} {}",
            format_native(estimate.total()),
            self.native_symbol
        );
        Ok(estimate)
    }

    fn is_unreliable(&self, estimate: &FeeEstimate) -> bool {
        let total = estimate.total();
        total == 0 || total < self.policy.floor_wei as u128
    }

    /// `fallback_gas_units` priced so the total lands at the ceiling
    fn ceiling_estimate(&self) -> FeeEstimate {
        let units = self.policy.fallback_gas_units.max(1);
        FeeEstimate::new(units, self.policy.ceiling_wei as u128 / units as u128)
    }
}

/// Smallest units to whole native units, e.g. 2_100_000_000_000_000 -> "0.0021"
pub fn format_native(wei: u128) -> String {
    i128::try_from(wei)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, NATIVE_DECIMALS).ok())
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| format!("{}e-{}", wei, NATIVE_DECIMALS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainError;
    use crate::chain::mock::MockChainClient;
    use crate::core_types::AssetId;

    fn policy() -> FeePolicy {
        FeePolicy {
            floor_wei: 1_000,
            ceiling_wei: 1_000_000_000_000_000,
            fallback_gas_units: 200_000,
            fallback_to_ceiling: true,
        }
    }

    fn lock() -> ContractCall {
        ContractCall::Lock {
            asset_id: AssetId::new(42),
        }
    }

    #[tokio::test]
    async fn test_accepts_estimate_within_bounds() {
        let chain = Arc::new(MockChainClient::new("polygon"));
        chain.set_default_fee(FeeEstimate::new(35_000, 20_000_000_000));
        let estimator = FeeEstimator::with_policy(chain.clone(), policy(), "MATIC");

        let fee = estimator.estimate(&lock()).await.unwrap();
        assert_eq!(fee.total(), 700_000_000_000_000);
        assert_eq!(chain.estimate_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_estimate_reestimates_exactly_once_then_falls_back() {
        let chain = Arc::new(MockChainClient::new("polygon"));
        chain.set_default_fee(FeeEstimate::new(0, 30_000_000_000));
        let estimator = FeeEstimator::with_policy(chain.clone(), policy(), "MATIC");

        let fee = estimator.estimate(&lock()).await.unwrap();
        assert_eq!(chain.estimate_count(), 2);
        assert_eq!(fee.gas_units, 200_000);
        assert_eq!(fee.total(), 1_000_000_000_000_000);
    }

    #[tokio::test]
    async fn test_zero_then_good_estimate_uses_second() {
        let chain = Arc::new(MockChainClient::new("polygon"));
        chain.push_fee(Ok(FeeEstimate::new(0, 0)));
        chain.push_fee(Ok(FeeEstimate::new(50_000, 10)));
        let estimator = FeeEstimator::with_policy(chain.clone(), policy(), "MATIC");

        let fee = estimator.estimate(&lock()).await.unwrap();
        assert_eq!(fee, FeeEstimate::new(50_000, 10));
        assert_eq!(chain.estimate_count(), 2);
    }

    #[tokio::test]
    async fn test_unreliable_without_fallback() {
        let chain = Arc::new(MockChainClient::new("polygon"));
        chain.set_default_fee(FeeEstimate::new(1, 1));
        let mut policy = policy();
        policy.fallback_to_ceiling = false;
        let estimator = FeeEstimator::with_policy(chain.clone(), policy, "MATIC");

        let err = estimator.estimate(&lock()).await.unwrap_err();
        assert_eq!(err.code(), "ESTIMATION_UNRELIABLE");
        assert!(err.is_transient());
        assert_eq!(chain.estimate_count(), 2);
    }

    #[tokio::test]
    async fn test_over_ceiling_is_fee_too_high() {
        let chain = Arc::new(MockChainClient::new("sepolia"));
        chain.set_default_fee(FeeEstimate::new(1_000_000, 2_000_000_000_000));
        let estimator = FeeEstimator::with_policy(chain.clone(), policy(), "ETH");

        let err = estimator.estimate(&lock()).await.unwrap_err();
        assert!(matches!(err, BridgeError::FeeTooHigh { .. }));
        assert_eq!(chain.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_node_errors_propagate() {
        let chain = Arc::new(MockChainClient::new("sepolia"));
        chain.push_fee(Err(ChainError::Rpc("connection refused".into())));
        let estimator = FeeEstimator::with_policy(chain.clone(), policy(), "ETH");

        let err = estimator.estimate(&lock()).await.unwrap_err();
        assert_eq!(err.code(), "RPC_ERROR");
    }

    #[test]
    fn test_format_native() {
        assert_eq!(format_native(2_100_000_000_000_000), "0.0021");
        assert_eq!(format_native(1_000_000_000_000_000_000), "1");
        assert_eq!(format_native(0), "0");
    }
}
