//! 命令历史内存存储实现

use super::newest_first;
use crate::error::StorageError;
use crate::traits::CommandStore;
use domain::{CommandRecord, CommandState};
use std::sync::RwLock;

/// 命令内存存储
pub struct InMemoryCommandStore {
    commands: RwLock<Vec<CommandRecord>>,
}

impl InMemoryCommandStore {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryCommandStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn save_command(&self, record: &CommandRecord) -> Result<(), StorageError> {
        let mut commands = self
            .commands
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        match commands
            .iter_mut()
            .find(|item| item.command_id == record.command_id)
        {
            // 终态不可再变
            Some(existing) if existing.state.is_terminal() => {}
            Some(existing) => *existing = record.clone(),
            None => commands.push(record.clone()),
        }
        Ok(())
    }

    async fn find_command(&self, command_id: &str) -> Result<Option<CommandRecord>, StorageError> {
        let commands = self
            .commands
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(commands
            .iter()
            .find(|item| item.command_id == command_id)
            .cloned())
    }

    async fn list_commands(&self, limit: usize) -> Result<Vec<CommandRecord>, StorageError> {
        let commands = self
            .commands
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(newest_first(&commands, limit, |item| item.issued_at_ms))
    }

    async fn expire_pending(
        &self,
        deadline_before_ms: i64,
        resolved_at_ms: i64,
    ) -> Result<usize, StorageError> {
        let mut commands = self
            .commands
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut expired = 0;
        for item in commands
            .iter_mut()
            .filter(|item| item.state == CommandState::Pending)
            .filter(|item| item.deadline_ms <= deadline_before_ms)
        {
            item.state = CommandState::TimedOut;
            item.resolved_at_ms = Some(resolved_at_ms);
            expired += 1;
        }
        Ok(expired)
    }
}
