//! Postgres 状态日志存储实现

use super::{limit_to_db, sequence_from_db, sequence_to_db};
use crate::error::StorageError;
use crate::traits::StatusLogStore;
use domain::{Apartment, DeviceStatus, DoorState, StatusLog};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

pub struct PgStatusLogStore {
    pub pool: PgPool,
}

impl PgStatusLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StatusLogStore for PgStatusLogStore {
    async fn append_status_log(&self, log: &StatusLog) -> Result<(), StorageError> {
        let keys = serde_json::to_string(&log.keys)?;
        sqlx::query(
            "insert into domophone_status_logs \
             (log_id, device_address, logged_at_ms, sequence, status, door, keys, message) \
             values ($1, $2, $3, $4, $5, $6, $7::jsonb, $8) \
             on conflict (log_id) do nothing",
        )
        .bind(&log.log_id)
        .bind(&log.device_address)
        .bind(log.logged_at_ms)
        .bind(sequence_to_db(log.sequence)?)
        .bind(log.status.as_str())
        .bind(log.door.as_str())
        .bind(keys)
        .bind(&log.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_status_logs(&self, limit: usize) -> Result<Vec<StatusLog>, StorageError> {
        let rows = sqlx::query(
            "select log_id, device_address, logged_at_ms, sequence, status, door, \
             keys::text as keys, message \
             from domophone_status_logs order by logged_at_ms desc limit $1",
        )
        .bind(limit_to_db(limit))
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let keys: String = row.try_get("keys")?;
            let keys: BTreeMap<Apartment, Vec<String>> = serde_json::from_str(&keys)?;
            items.push(StatusLog {
                log_id: row.try_get("log_id")?,
                device_address: row.try_get("device_address")?,
                logged_at_ms: row.try_get("logged_at_ms")?,
                sequence: sequence_from_db(row.try_get("sequence")?)?,
                status: DeviceStatus::parse(&row.try_get::<String, _>("status")?),
                door: DoorState::parse(&row.try_get::<String, _>("door")?),
                keys,
                message: row.try_get("message")?,
            });
        }
        Ok(items)
    }
}
