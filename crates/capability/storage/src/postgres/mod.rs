//! # PostgreSQL 存储实现模块
//!
//! 所有 SQL 使用参数绑定；钥匙集合与命令载荷以 jsonb 保存，读出时转为 text 再反序列化。
//!
//! ## 数据库表
//!
//! - `domophone_devices`：设备记录（address 主键，save 为按 revision 条件的 upsert）
//! - `domophone_events`：设备事件（event_id 主键，重复写入忽略）
//! - `domophone_status_logs`：状态日志（log_id 主键，重复写入忽略）
//! - `domophone_commands`：命令历史（command_id 主键，save 为 upsert）
//!
//! 建表脚本见 `migrations/0001_domophone.sql`，由 [`crate::apply_schema`] 执行。

pub mod command;
pub mod device;
pub mod event;
pub mod status_log;

pub use command::*;
pub use device::*;
pub use event::*;
pub use status_log::*;

use crate::error::StorageError;

/// `u64` 序号以 bigint 保存。
pub(crate) fn sequence_to_db(sequence: Option<u64>) -> Result<Option<i64>, StorageError> {
    sequence
        .map(|value| {
            i64::try_from(value).map_err(|_| StorageError::new("sequence out of range"))
        })
        .transpose()
}

pub(crate) fn sequence_from_db(sequence: Option<i64>) -> Result<Option<u64>, StorageError> {
    sequence
        .map(|value| {
            u64::try_from(value).map_err(|_| StorageError::new("negative sequence in storage"))
        })
        .transpose()
}

pub(crate) fn limit_to_db(limit: usize) -> i64 {
    if limit == 0 {
        i64::MAX
    } else {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }
}
