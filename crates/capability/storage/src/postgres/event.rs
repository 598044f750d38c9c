//! Postgres 事件存储实现

use super::limit_to_db;
use crate::error::StorageError;
use crate::traits::EventStore;
use domain::{DeviceEvent, EventKind};
use sqlx::{PgPool, Row};

pub struct PgEventStore {
    pub pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EventStore for PgEventStore {
    async fn append_event(&self, event: &DeviceEvent) -> Result<(), StorageError> {
        sqlx::query(
            "insert into domophone_events \
             (event_id, device_address, kind, apartment, key_id, ts_ms) \
             values ($1, $2, $3, $4, $5, $6) \
             on conflict (event_id) do nothing",
        )
        .bind(&event.event_id)
        .bind(&event.device_address)
        .bind(event.kind.as_str())
        .bind(event.apartment.map(i64::from))
        .bind(&event.key_id)
        .bind(event.ts_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<DeviceEvent>, StorageError> {
        let rows = sqlx::query(
            "select event_id, device_address, kind, apartment, key_id, ts_ms \
             from domophone_events order by ts_ms desc limit $1",
        )
        .bind(limit_to_db(limit))
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let kind = EventKind::parse(&kind)
                .ok_or_else(|| StorageError::new(format!("unknown event kind {kind}")))?;
            let apartment = row
                .try_get::<Option<i64>, _>("apartment")?
                .map(|value| {
                    u32::try_from(value).map_err(|_| StorageError::new("apartment out of range"))
                })
                .transpose()?;
            items.push(DeviceEvent {
                event_id: row.try_get("event_id")?,
                device_address: row.try_get("device_address")?,
                kind,
                apartment,
                key_id: row.try_get("key_id")?,
                ts_ms: row.try_get("ts_ms")?,
            });
        }
        Ok(items)
    }
}
