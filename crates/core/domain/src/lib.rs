//! 门禁对讲机（domophone）领域模型：设备、命令、事件与状态日志。

pub mod command;
pub mod device;
pub mod event;

pub use command::{CommandKind, CommandPayload, CommandRecord, CommandState, Intent};
pub use device::{
    Apartment, Device, DeviceStatus, DoorState, InactiveReason, KeyMutation, group_keys,
};
pub use event::{DeviceEvent, EventKind, StatusLog};

/// 系统发起操作时使用的 actor 名称。
pub const SYSTEM_ACTOR: &str = "system";

/// 当前 Unix 时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
