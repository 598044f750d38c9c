//! 存储接口 Trait 定义
//!
//! 持久化只作为设备记录、事件与日志的落盘/恢复来源，从不参与协调：
//! - DeviceStore：设备记录（启动时全量加载）
//! - EventStore：设备事件（只追加）
//! - StatusLogStore：状态快照日志（只追加）
//! - CommandStore：命令历史
//!
//! 追加类接口按主键幂等：重复写入同一 id 不产生第二条记录，便于失败重试。

use crate::error::StorageError;
use async_trait::async_trait;
use domain::{CommandRecord, Device, DeviceEvent, StatusLog};

/// 设备存储接口
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 保存（插入或覆盖）设备记录
    async fn save_device(&self, device: &Device) -> Result<(), StorageError>;

    /// 加载全部设备，用于启动时恢复注册表
    async fn load_all_devices(&self) -> Result<Vec<Device>, StorageError>;
}

/// 事件存储接口
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_event(&self, event: &DeviceEvent) -> Result<(), StorageError>;

    /// 最近的事件，按时间倒序
    async fn list_events(&self, limit: usize) -> Result<Vec<DeviceEvent>, StorageError>;
}

/// 状态日志存储接口
#[async_trait]
pub trait StatusLogStore: Send + Sync {
    async fn append_status_log(&self, log: &StatusLog) -> Result<(), StorageError>;

    /// 最近的状态日志，按时间倒序
    async fn list_status_logs(&self, limit: usize) -> Result<Vec<StatusLog>, StorageError>;
}

/// 命令历史存储接口
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// 保存命令记录。已处于终态的记录不会被覆盖。
    async fn save_command(&self, record: &CommandRecord) -> Result<(), StorageError>;

    async fn find_command(&self, command_id: &str) -> Result<Option<CommandRecord>, StorageError>;

    /// 最近的命令，按下发时间倒序
    async fn list_commands(&self, limit: usize) -> Result<Vec<CommandRecord>, StorageError>;

    /// 将 `deadline_ms <= deadline_before_ms` 的 `pending` 记录置为 `timed_out`，返回条数
    async fn expire_pending(
        &self,
        deadline_before_ms: i64,
        resolved_at_ms: i64,
    ) -> Result<usize, StorageError>;
}
