//! 持久化出口：四类存储的组合

use crate::in_memory::{
    InMemoryCommandStore, InMemoryDeviceStore, InMemoryEventStore, InMemoryStatusLogStore,
};
use crate::postgres::{PgCommandStore, PgDeviceStore, PgEventStore, PgStatusLogStore};
use crate::traits::{CommandStore, DeviceStore, EventStore, StatusLogStore};
use sqlx::PgPool;
use std::sync::Arc;

/// 持久化出口。各组件只持有自己需要的那部分存储。
#[derive(Clone)]
pub struct PersistenceSink {
    pub devices: Arc<dyn DeviceStore>,
    pub events: Arc<dyn EventStore>,
    pub status_logs: Arc<dyn StatusLogStore>,
    pub commands: Arc<dyn CommandStore>,
}

impl PersistenceSink {
    /// 内存实现（测试与无数据库运行）
    pub fn in_memory() -> Self {
        Self {
            devices: Arc::new(InMemoryDeviceStore::new()),
            events: Arc::new(InMemoryEventStore::new()),
            status_logs: Arc::new(InMemoryStatusLogStore::new()),
            commands: Arc::new(InMemoryCommandStore::new()),
        }
    }

    /// PostgreSQL 实现
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            devices: Arc::new(PgDeviceStore::new(pool.clone())),
            events: Arc::new(PgEventStore::new(pool.clone())),
            status_logs: Arc::new(PgStatusLogStore::new(pool.clone())),
            commands: Arc::new(PgCommandStore::new(pool)),
        }
    }
}
