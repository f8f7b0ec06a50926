//! Core types used throughout the system
//!
//! Identifiers shared by the chain clients, the ledger and the orchestrator.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use thiserror::Error;

/// Token id of the bridged NFT.
///
/// # Constraints:
/// - **Same value on both chains**: the destination mint reuses the source id
/// - **uint256 on chain**: the full ABI range is accepted
/// - **Key of the ledger**: at most one in-flight transfer per id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub U256);

impl AssetId {
    pub const fn new(id: u64) -> Self {
        Self(U256::from_limbs([id, 0, 0, 0]))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid token id '{0}': expected a decimal uint256")]
pub struct ParseAssetIdError(String);

impl FromStr for AssetId {
    type Err = ParseAssetIdError;

    /// Decimal only, as token ids are shown by explorers and marketplaces
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseAssetIdError(s.to_string()));
        }
        U256::from_str_radix(trimmed, 10)
            .map(Self)
            .map_err(|_| ParseAssetIdError(s.to_string()))
    }
}

impl From<U256> for AssetId {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for AssetId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Transfer ID - ULID per transfer attempt.
///
/// Sortable by creation time, so "latest record for an asset" is the
/// greatest id among that asset's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Unix timestamp in milliseconds
pub type TimestampMs = i64;

pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_parse_and_display() {
        let id: AssetId = " 42 ".parse().unwrap();
        assert_eq!(id, AssetId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!("0x2a".parse::<AssetId>().is_err());
        assert!("".parse::<AssetId>().is_err());
        assert!("-1".parse::<AssetId>().is_err());
    }

    #[test]
    fn test_asset_id_spans_uint256() {
        let max = U256::MAX.to_string();
        let id: AssetId = max.parse().unwrap();
        assert_eq!(id.0, U256::MAX);
        assert_eq!(id.to_string(), max);
        assert!(id > AssetId::from(u64::MAX));

        // One past uint256 overflows
        let too_big = format!("{}0", max);
        assert!(too_big.parse::<AssetId>().is_err());
    }

    #[test]
    fn test_transfer_id_ordering() {
        let a = TransferId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TransferId::new();
        assert!(b > a);
        assert_eq!(a.to_string().parse::<TransferId>().unwrap(), a);
    }
}
