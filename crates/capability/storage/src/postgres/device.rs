//! Postgres 设备存储实现

use super::{sequence_from_db, sequence_to_db};
use crate::error::StorageError;
use crate::traits::DeviceStore;
use domain::{Apartment, Device, DeviceStatus, DoorState, InactiveReason};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

pub struct PgDeviceStore {
    pub pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeviceStore for PgDeviceStore {
    async fn save_device(&self, device: &Device) -> Result<(), StorageError> {
        let keys = serde_json::to_string(&device.grouped_keys())?;
        sqlx::query(
            "insert into domophone_devices \
             (address, model, location, status, door, keys, active, inactive_reason, \
              last_seen_ms, last_sequence, last_report_ts, offline_since_ms, keys_seeded, \
              revision, updated_at) \
             values ($1, $2, $3, $4, $5, $6::jsonb, $7, $8, $9, $10, $11, $12, $13, $14, now()) \
             on conflict (address) do update set \
             model = excluded.model, location = excluded.location, status = excluded.status, \
             door = excluded.door, keys = excluded.keys, active = excluded.active, \
             inactive_reason = excluded.inactive_reason, last_seen_ms = excluded.last_seen_ms, \
             last_sequence = excluded.last_sequence, last_report_ts = excluded.last_report_ts, \
             offline_since_ms = excluded.offline_since_ms, keys_seeded = excluded.keys_seeded, \
             revision = excluded.revision, updated_at = now() \
             where domophone_devices.revision <= excluded.revision",
        )
        .bind(&device.address)
        .bind(&device.model)
        .bind(&device.location)
        .bind(device.status.as_str())
        .bind(device.door.as_str())
        .bind(keys)
        .bind(device.active)
        .bind(device.inactive_reason.map(|reason| reason.as_str()))
        .bind(device.last_seen_ms)
        .bind(sequence_to_db(device.last_sequence)?)
        .bind(device.last_report_ts)
        .bind(device.offline_since_ms)
        .bind(device.keys_seeded)
        .bind(sequence_to_db(Some(device.revision))?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_all_devices(&self) -> Result<Vec<Device>, StorageError> {
        let rows = sqlx::query(
            "select address, model, location, status, door, keys::text as keys, active, \
             inactive_reason, last_seen_ms, last_sequence, last_report_ts, offline_since_ms, \
             keys_seeded, revision from domophone_devices order by address",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(device_from_row(&row)?);
        }
        Ok(items)
    }
}

fn device_from_row(row: &PgRow) -> Result<Device, StorageError> {
    let mut device = Device::new(
        row.try_get::<String, _>("address")?,
        row.try_get::<String, _>("model")?,
        row.try_get::<String, _>("location")?,
    );
    device.status = DeviceStatus::parse(&row.try_get::<String, _>("status")?);
    device.door = DoorState::parse(&row.try_get::<String, _>("door")?);
    let keys: String = row.try_get("keys")?;
    let grouped: BTreeMap<Apartment, Vec<String>> = serde_json::from_str(&keys)?;
    device.replace_keys(&grouped);
    device.active = row.try_get("active")?;
    device.inactive_reason = row
        .try_get::<Option<String>, _>("inactive_reason")?
        .as_deref()
        .and_then(InactiveReason::parse);
    device.last_seen_ms = row.try_get("last_seen_ms")?;
    device.last_sequence = sequence_from_db(row.try_get("last_sequence")?)?;
    device.last_report_ts = row.try_get("last_report_ts")?;
    device.offline_since_ms = row.try_get("offline_since_ms")?;
    device.keys_seeded = row.try_get("keys_seeded")?;
    device.revision = sequence_from_db(Some(row.try_get("revision")?))?.unwrap_or_default();
    Ok(device)
}
