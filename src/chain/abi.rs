//! Bridge contract ABI.
//!
//! Parameter layouts come from the `sol!` interface below. Function and
//! event names come from configuration, so selectors and the `Locked` topic
//! are hashed from the configured signatures:
//! - `lock(uint256)`
//! - `mint(address,uint256,string)`
//! - event `Locked(address indexed, uint256 indexed, string)`

use alloy_primitives::{Address, B256, keccak256};
use alloy_sol_types::{SolCall, SolEvent, sol};

use super::error::ChainError;
use crate::core_types::AssetId;

sol! {
    /// Source and destination bridge contracts.
    #[derive(Debug)]
    interface IBridge {
        /// Emitted by the source contract when a token is locked.
        event Locked(address indexed owner, uint256 indexed tokenId, string tokenURI);

        function lockNFT(uint256 tokenId) external;

        function mintBridgedNFT(address owner, uint256 tokenId, string tokenURI) external;
    }
}

/// Parameter layout required of the configured lock function
pub const LOCK_PARAMS: &str = "(uint256)";
/// Parameter layout required of the configured mint function
pub const MINT_PARAMS: &str = "(address,uint256,string)";
/// Parameter layout required of the configured lock event
pub const LOCKED_EVENT_PARAMS: &str = "(address,uint256,string)";

/// 4-byte function selector
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// topic0 of an event
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// Check that `signature` is `name(params)` with exactly the expected params
pub fn check_layout(signature: &str, params: &str) -> Result<(), ChainError> {
    match signature.find('(') {
        Some(idx) if idx > 0 && &signature[idx..] == params => Ok(()),
        _ => Err(ChainError::Decode(format!(
            "signature '{}' must have parameters {}",
            signature, params
        ))),
    }
}

/// Calldata of `call` with its selector replaced by the configured one
fn with_selector(signature: &str, call: &impl SolCall) -> Vec<u8> {
    let mut data = call.abi_encode();
    data[..4].copy_from_slice(&selector(signature));
    data
}

pub fn encode_lock(signature: &str, asset_id: AssetId) -> Vec<u8> {
    with_selector(signature, &IBridge::lockNFTCall { tokenId: asset_id.0 })
}

pub fn encode_mint(
    signature: &str,
    owner: &str,
    asset_id: AssetId,
    token_uri: &str,
) -> Result<Vec<u8>, ChainError> {
    let owner: Address = owner
        .parse()
        .map_err(|e| ChainError::Decode(format!("invalid owner address '{}': {}", owner, e)))?;
    Ok(with_selector(
        signature,
        &IBridge::mintBridgedNFTCall {
            owner,
            tokenId: asset_id.0,
            tokenURI: token_uri.to_string(),
        },
    ))
}

/// Asset id as an indexed uint256 topic, for log filters
pub fn asset_topic(asset_id: AssetId) -> B256 {
    B256::from(asset_id.0.to_be_bytes::<32>())
}

/// Decoded `Locked` log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedLog {
    pub owner: Address,
    pub asset_id: AssetId,
    pub token_uri: String,
}

/// Decode a `Locked` log already matched on the configured topic0.
///
/// The topic0 is swapped for the canonical one so the generated decoder
/// checks only the layout, whatever the event is named on chain.
pub fn decode_locked(topics: &[B256], data: &[u8]) -> Result<LockedLog, ChainError> {
    if topics.len() != 3 {
        return Err(ChainError::Decode(format!(
            "Locked log has {} topics, expected 3",
            topics.len()
        )));
    }
    let canonical = [IBridge::Locked::SIGNATURE_HASH, topics[1], topics[2]];
    let event = IBridge::Locked::decode_raw_log(canonical, data, true)
        .map_err(|e| ChainError::Decode(format!("invalid Locked log: {}", e)))?;

    Ok(LockedLog {
        owner: event.owner,
        asset_id: AssetId(event.tokenId),
        token_uri: event.tokenURI,
    })
}

pub fn parse_topic(topic: &str) -> Result<B256, ChainError> {
    topic
        .parse()
        .map_err(|e| ChainError::Decode(format!("invalid topic '{}': {}", topic, e)))
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, ChainError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(stripped).map_err(|e| ChainError::Decode(format!("invalid hex '{}': {}", s, e)))
}

/// Parse a 0x-prefixed hex quantity (gas prices)
pub fn parse_quantity(s: &str) -> Result<u128, ChainError> {
    u128::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Decode(format!("invalid quantity '{}': {}", s, e)))
}

/// Parse a quantity that must fit in 64 bits (block numbers, log indexes, gas)
pub fn parse_u64(s: &str) -> Result<u64, ChainError> {
    let value = parse_quantity(s)?;
    u64::try_from(value)
        .map_err(|_| ChainError::Decode(format!("quantity '{}' exceeds 64 bits", s)))
}
