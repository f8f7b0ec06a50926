//! PostgreSQL ledger
//!
//! Table `bridge_transfers_tb` (see `db::init_schema`). Cross-process safety
//! comes from the database itself:
//! - a partial unique index on `asset_id` over non-terminal stages makes
//!   `create` single-writer per asset
//! - `save` is a CAS update that only matches the row at the caller's
//!   `version` whose stored stage may legally move to the new one
//! - the drive lease (`lease_owner`, `lease_expires_at`) is written through
//!   that same CAS, so two relays cannot both claim a record

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::chain::TxRef;
use crate::core_types::{AssetId, TimestampMs, TransferId};

use super::TransferLedger;
use crate::bridge::error::BridgeError;
use crate::bridge::state::TransferStage;
use crate::bridge::types::TransferRecord;

const COLUMNS: &str = "transfer_id, asset_id, stage, lock_tx, mint_tx, owner_address, \
                       token_uri, attempts, last_error, created_at, updated_at, version, \
                       lease_owner, lease_expires_at";

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stored stage and version of a transfer
    async fn stored_state(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<(i16, i64)>, BridgeError> {
        let row = sqlx::query(
            "SELECT stage, version FROM bridge_transfers_tb WHERE transfer_id = $1",
        )
        .bind(transfer_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some((row.try_get("stage")?, row.try_get("version")?))),
            None => Ok(None),
        }
    }

    fn row_to_record(&self, row: &sqlx::postgres::PgRow) -> Result<TransferRecord, BridgeError> {
        let transfer_id_str: String = row.try_get("transfer_id")?;
        let transfer_id: TransferId = transfer_id_str
            .parse()
            .map_err(|_| BridgeError::SystemError("Invalid transfer_id format".to_string()))?;

        let asset_str: String = row.try_get("asset_id")?;
        let asset_id: AssetId = asset_str
            .parse()
            .map_err(|_| BridgeError::SystemError(format!("Invalid asset_id: {}", asset_str)))?;

        let stage_id: i16 = row.try_get("stage")?;
        let stage = TransferStage::from_id(stage_id)
            .ok_or_else(|| BridgeError::SystemError(format!("Invalid stage ID: {}", stage_id)))?;

        let attempts: i32 = row.try_get("attempts")?;
        let version: i64 = row.try_get("version")?;
        let created_at: chrono::DateTime<chrono::Utc> = row.try_get("created_at")?;
        let updated_at: chrono::DateTime<chrono::Utc> = row.try_get("updated_at")?;

        Ok(TransferRecord {
            transfer_id,
            asset_id,
            stage,
            lock_tx: decode_tx(row.try_get("lock_tx")?)?,
            mint_tx: decode_tx(row.try_get("mint_tx")?)?,
            owner_address: row.try_get("owner_address")?,
            token_uri: row.try_get("token_uri")?,
            attempts: attempts.max(0) as u32,
            last_error: row.try_get("last_error")?,
            created_at: created_at.timestamp_millis(),
            updated_at: updated_at.timestamp_millis(),
            version: u64::try_from(version)
                .map_err(|_| BridgeError::SystemError(format!("Invalid version: {}", version)))?,
            lease_owner: row.try_get("lease_owner")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
        })
    }
}

fn encode_tx(tx: &Option<TxRef>) -> Result<Option<String>, BridgeError> {
    tx.as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| BridgeError::SystemError(format!("Failed to encode tx ref: {}", e)))
}

fn decode_tx(raw: Option<String>) -> Result<Option<TxRef>, BridgeError> {
    raw.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| BridgeError::SystemError(format!("Invalid tx ref: {}", e)))
}

fn timestamp(ms: TimestampMs) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl TransferLedger for PgLedger {
    async fn create(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        let record = TransferRecord::new(asset_id);

        let result = sqlx::query(
            r#"
            INSERT INTO bridge_transfers_tb
                (transfer_id, asset_id, stage, attempts, created_at, updated_at)
            VALUES
                ($1, $2, $3, 0, $4, $5)
            "#,
        )
        .bind(record.transfer_id.to_string())
        .bind(asset_id.to_string())
        .bind(record.stage.id())
        .bind(timestamp(record.created_at))
        .bind(timestamp(record.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(record),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(BridgeError::AlreadyInFlight(asset_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, asset_id: AssetId) -> Result<TransferRecord, BridgeError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bridge_transfers_tb WHERE asset_id = $1 ORDER BY id DESC LIMIT 1",
            COLUMNS
        ))
        .bind(asset_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.row_to_record(&row),
            None => Err(BridgeError::TransferNotFound(format!("asset {}", asset_id))),
        }
    }

    async fn save(&self, record: &mut TransferRecord) -> Result<(), BridgeError> {
        let version = i64::try_from(record.version)
            .map_err(|_| BridgeError::SystemError(format!("Invalid version: {}", record.version)))?;

        // Matches only the copy we loaded, if its stage is live and not ahead
        // of the new one (FAILED is reachable from any live stage)
        let result = sqlx::query(
            r#"
            UPDATE bridge_transfers_tb
            SET stage = $1, lock_tx = $2, mint_tx = $3, owner_address = $4,
                token_uri = $5, attempts = $6, last_error = $7, updated_at = $8,
                lease_owner = $12, lease_expires_at = $13, version = version + 1
            WHERE transfer_id = $9
              AND stage NOT IN ($10, $11)
              AND (stage <= $1 OR $1 = $11)
              AND version = $14
            "#,
        )
        .bind(record.stage.id())
        .bind(encode_tx(&record.lock_tx)?)
        .bind(encode_tx(&record.mint_tx)?)
        .bind(&record.owner_address)
        .bind(&record.token_uri)
        .bind(record.attempts.min(i32::MAX as u32) as i32)
        .bind(&record.last_error)
        .bind(timestamp(record.updated_at))
        .bind(record.transfer_id.to_string())
        .bind(TransferStage::MintConfirmed.id())
        .bind(TransferStage::Failed.id())
        .bind(&record.lease_owner)
        .bind(record.lease_expires_at)
        .bind(version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            record.version += 1;
            return Ok(());
        }

        let (stage_id, stored_version) = self
            .stored_state(record.transfer_id)
            .await?
            .ok_or_else(|| BridgeError::TransferNotFound(record.transfer_id.to_string()))?;
        let stage = TransferStage::from_id(stage_id)
            .ok_or_else(|| BridgeError::SystemError(format!("Invalid stage ID: {}", stage_id)))?;

        if !stage.can_transition_to(record.stage) {
            Err(BridgeError::InvalidStateTransition(format!(
                "{}: stored {} cannot move to {}",
                record.transfer_id, stage, record.stage
            )))
        } else {
            Err(BridgeError::ConcurrentModification(format!(
                "{}: stored version {}, written from version {}",
                record.transfer_id, stored_version, record.version
            )))
        }
    }

    async fn list_non_terminal(&self) -> Result<Vec<TransferRecord>, BridgeError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM bridge_transfers_tb WHERE stage NOT IN ($1, $2) ORDER BY id ASC",
            COLUMNS
        ))
        .bind(TransferStage::MintConfirmed.id())
        .bind(TransferStage::Failed.id())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.row_to_record(&row)?);
        }
        Ok(records)
    }
}
