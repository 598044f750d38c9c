//! 状态日志内存存储实现

use super::newest_first;
use crate::error::StorageError;
use crate::traits::StatusLogStore;
use domain::StatusLog;
use std::sync::RwLock;

pub struct InMemoryStatusLogStore {
    logs: RwLock<Vec<StatusLog>>,
}

impl InMemoryStatusLogStore {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStatusLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StatusLogStore for InMemoryStatusLogStore {
    async fn append_status_log(&self, log: &StatusLog) -> Result<(), StorageError> {
        let mut logs = self
            .logs
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if logs.iter().any(|item| item.log_id == log.log_id) {
            return Ok(());
        }
        logs.push(log.clone());
        Ok(())
    }

    async fn list_status_logs(&self, limit: usize) -> Result<Vec<StatusLog>, StorageError> {
        let logs = self
            .logs
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(newest_first(&logs, limit, |item| item.logged_at_ms))
    }
}
