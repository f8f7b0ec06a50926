use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL URL for the durable transfer ledger. Without it the relay
    /// keeps transfers in memory only.
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeConfig {
    /// Chain the NFT is locked on
    pub source: ChainConfig,
    /// Chain the bridged NFT is minted on
    pub destination: ChainConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Identity written into drive leases. Keep it stable across restarts
    /// so a restarted relay resumes its own transfers at once.
    #[serde(default = "default_relay_id")]
    pub relay_id: String,
    /// Lease lifetime, renewed on every save. Must outlast one confirmation
    /// wait.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
}

fn default_confirmation_timeout_ms() -> u64 {
    120_000
}

fn default_relay_id() -> String {
    format!("relay-{}", ulid::Ulid::new())
}

fn default_lease_ttl_ms() -> u64 {
    600_000
}

fn default_max_concurrent_transfers() -> usize {
    8
}

impl BridgeConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

/// Per-chain connection and contract settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainConfig {
    pub chain_id: String,
    /// Symbol used when logging fees (e.g., "MATIC", "ETH")
    pub native_symbol: String,
    pub rpc: RpcConfig,
    pub contract_address: String,
    /// Node-managed account that signs bridge transactions
    pub signer_address: String,
    pub required_confirmations: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub abi: AbiConfig,
    #[serde(default)]
    pub fee: FeePolicy,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcConfig {
    pub url: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

/// Contract interface signatures. Names may change per deployment, the
/// parameter layout may not.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AbiConfig {
    pub lock_function: String,
    pub mint_function: String,
    pub locked_event: String,
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self {
            lock_function: "lockNFT(uint256)".to_string(),
            mint_function: "mintBridgedNFT(address,uint256,string)".to_string(),
            locked_event: "Locked(address,uint256,string)".to_string(),
        }
    }
}

/// Bounds applied to fee estimates before any submission
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FeePolicy {
    /// Totals below this (in wei) are treated as unreliable
    pub floor_wei: u64,
    /// Totals above this (in wei) abort with FEE_TOO_HIGH
    pub ceiling_wei: u64,
    /// Gas units assumed when falling back to the ceiling
    pub fallback_gas_units: u64,
    pub fallback_to_ceiling: bool,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            floor_wei: 1,
            ceiling_wei: 50_000_000_000_000_000, // 0.05 native units
            fallback_gas_units: 300_000,
            fallback_to_ceiling: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per stage before the transfer is marked FAILED
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base_backoff_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Interval of the periodic sweep; the startup sweep always runs
    pub scan_interval_ms: u64,
    /// Maximum records resumed per sweep
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 30_000,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bridge = &self.bridge;
        if bridge.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if bridge.max_concurrent_transfers == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_transfers must be at least 1".to_string(),
            ));
        }
        for chain in [&bridge.source, &bridge.destination] {
            if chain.required_confirmations == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}: required_confirmations must be at least 1",
                    chain.chain_id
                )));
            }
            if chain.fee.ceiling_wei < chain.fee.floor_wei {
                return Err(ConfigError::Invalid(format!(
                    "{}: fee ceiling is below the floor",
                    chain.chain_id
                )));
            }
            if chain.fee.fallback_gas_units == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}: fallback_gas_units must be positive",
                    chain.chain_id
                )));
            }
        }
        if bridge.relay_id.trim().is_empty() {
            return Err(ConfigError::Invalid("relay_id must not be empty".to_string()));
        }
        if bridge.lease_ttl_ms <= bridge.confirmation_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "lease_ttl_ms ({}) must exceed confirmation_timeout_ms ({})",
                bridge.lease_ttl_ms, bridge.confirmation_timeout_ms
            )));
        }
        if bridge.source.chain_id == bridge.destination.chain_id {
            return Err(ConfigError::Invalid(
                "source and destination chain_id must differ".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
log_level: "info"
log_dir: "./logs"
log_file: "bridge.log"
use_json: false
rotation: "daily"
bridge:
  source:
    chain_id: "polygon"
    native_symbol: "MATIC"
    rpc:
      url: "http://127.0.0.1:8545"
    contract_address: "0xA90CeD32E40A95725C943D5392F862aEBf3C7928"
    signer_address: "0x00000000000000000000000000000000000000a1"
    required_confirmations: 3
  destination:
    chain_id: "sepolia"
    native_symbol: "ETH"
    rpc:
      url: "http://127.0.0.1:8546"
      timeout_ms: 5000
    contract_address: "0x064E7B51564504a95C262eD136547EF43e9973b4"
    signer_address: "0x00000000000000000000000000000000000000a1"
    required_confirmations: 2
    fee:
      floor_wei: 1000
      ceiling_wei: 1000000000000000
      fallback_gas_units: 250000
      fallback_to_ceiling: false
  retry:
    max_attempts: 5
    base_backoff_ms: 200
    max_backoff_ms: 5000
"#;

    #[test]
    fn test_app_config_deserialize() {
        let config = AppConfig::from_yaml(YAML).unwrap();

        assert_eq!(config.bridge.source.chain_id, "polygon");
        assert_eq!(config.bridge.source.rpc.timeout_ms, 30_000);
        assert_eq!(config.bridge.source.poll_interval_ms, 2_000);
        assert_eq!(config.bridge.source.abi, AbiConfig::default());
        assert_eq!(config.bridge.source.fee, FeePolicy::default());
        assert_eq!(config.bridge.destination.rpc.timeout_ms, 5_000);
        assert!(!config.bridge.destination.fee.fallback_to_ceiling);
        assert_eq!(config.bridge.retry.max_attempts, 5);
        assert_eq!(config.bridge.max_concurrent_transfers, 8);
        assert_eq!(config.bridge.recovery, RecoveryConfig::default());
        assert!(config.postgres_url.is_none());
        assert!(config.bridge.relay_id.starts_with("relay-"));
        assert_eq!(config.bridge.lease_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_lease_must_outlast_confirmation_wait() {
        let yaml = YAML.replace(
            "bridge:\n",
            "bridge:\n  relay_id: \"relay-eu-1\"\n  confirmation_timeout_ms: 60000\n  lease_ttl_ms: 60000\n",
        );
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));

        let yaml = yaml.replace("lease_ttl_ms: 60000", "lease_ttl_ms: 90000");
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.bridge.relay_id, "relay-eu-1");
        assert_eq!(config.bridge.lease_ttl(), Duration::from_secs(90));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let yaml = YAML.replace("max_attempts: 5", "max_attempts: 0");
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));

        let yaml = YAML.replace("\"sepolia\"", "\"polygon\"");
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::from_file("/nonexistent/bridge.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
