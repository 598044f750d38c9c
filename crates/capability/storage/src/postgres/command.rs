//! Postgres 命令历史实现

use super::limit_to_db;
use crate::error::StorageError;
use crate::traits::CommandStore;
use domain::{CommandPayload, CommandRecord, CommandState};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub struct PgCommandStore {
    pub pool: PgPool,
}

impl PgCommandStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COMMAND: &str = "select command_id, device_address, payload::text as payload, state, \
     issued_by, issued_at_ms, deadline_ms, resolved_at_ms, cancelled from domophone_commands";

#[async_trait::async_trait]
impl CommandStore for PgCommandStore {
    async fn save_command(&self, record: &CommandRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&record.payload)?;
        sqlx::query(
            "insert into domophone_commands \
             (command_id, device_address, command_kind, payload, state, issued_by, \
              issued_at_ms, deadline_ms, resolved_at_ms, cancelled) \
             values ($1, $2, $3, $4::jsonb, $5, $6, $7, $8, $9, $10) \
             on conflict (command_id) do update set \
             state = excluded.state, resolved_at_ms = excluded.resolved_at_ms, \
             cancelled = excluded.cancelled \
             where domophone_commands.state = 'pending'",
        )
        .bind(&record.command_id)
        .bind(&record.device_address)
        .bind(record.kind().as_str())
        .bind(payload)
        .bind(record.state.as_str())
        .bind(&record.issued_by)
        .bind(record.issued_at_ms)
        .bind(record.deadline_ms)
        .bind(record.resolved_at_ms)
        .bind(record.cancelled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_command(&self, command_id: &str) -> Result<Option<CommandRecord>, StorageError> {
        let row = sqlx::query(&format!("{SELECT_COMMAND} where command_id = $1"))
            .bind(command_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(command_from_row).transpose()
    }

    async fn list_commands(&self, limit: usize) -> Result<Vec<CommandRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COMMAND} order by issued_at_ms desc limit $1"
        ))
        .bind(limit_to_db(limit))
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(command_from_row(&row)?);
        }
        Ok(items)
    }

    async fn expire_pending(
        &self,
        deadline_before_ms: i64,
        resolved_at_ms: i64,
    ) -> Result<usize, StorageError> {
        let result = sqlx::query(
            "update domophone_commands set state = 'timed_out', resolved_at_ms = $2 \
             where state = 'pending' and deadline_ms <= $1",
        )
        .bind(deadline_before_ms)
        .bind(resolved_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

fn command_from_row(row: &PgRow) -> Result<CommandRecord, StorageError> {
    let payload: String = row.try_get("payload")?;
    let payload: CommandPayload = serde_json::from_str(&payload)?;
    let state: String = row.try_get("state")?;
    let state = CommandState::parse(&state)
        .ok_or_else(|| StorageError::new(format!("unknown command state {state}")))?;
    Ok(CommandRecord {
        command_id: row.try_get("command_id")?,
        device_address: row.try_get("device_address")?,
        payload,
        state,
        issued_by: row.try_get("issued_by")?,
        issued_at_ms: row.try_get("issued_at_ms")?,
        deadline_ms: row.try_get("deadline_ms")?,
        resolved_at_ms: row.try_get("resolved_at_ms")?,
        cancelled: row.try_get("cancelled")?,
    })
}
