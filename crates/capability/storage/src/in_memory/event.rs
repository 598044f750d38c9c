//! 事件内存存储实现

use super::newest_first;
use crate::error::StorageError;
use crate::traits::EventStore;
use domain::DeviceEvent;
use std::sync::RwLock;

pub struct InMemoryEventStore {
    events: RwLock<Vec<DeviceEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_event(&self, event: &DeviceEvent) -> Result<(), StorageError> {
        let mut events = self
            .events
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if events.iter().any(|item| item.event_id == event.event_id) {
            return Ok(());
        }
        events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<DeviceEvent>, StorageError> {
        let events = self
            .events
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(newest_first(&events, limit, |item| item.ts_ms))
    }
}
