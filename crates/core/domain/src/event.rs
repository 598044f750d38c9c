//! 设备事件与状态日志（只追加，不修改）。

use crate::device::{Apartment, DeviceStatus, DoorState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 事件类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DoorOpened,
    DoorClosed,
    KeyUsed,
    Call,
    DeviceActivated,
    DeviceDeactivated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DoorOpened => "door_opened",
            EventKind::DoorClosed => "door_closed",
            EventKind::KeyUsed => "key_used",
            EventKind::Call => "call",
            EventKind::DeviceActivated => "device_activated",
            EventKind::DeviceDeactivated => "device_deactivated",
        }
    }

    /// 兼容设备固件的旧事件名。
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "door_opened" | "door_open" => Some(EventKind::DoorOpened),
            "door_closed" | "door_close" => Some(EventKind::DoorClosed),
            "key_used" | "key_event" => Some(EventKind::KeyUsed),
            "call" | "call_event" => Some(EventKind::Call),
            "device_activated" | "domophone_activated" => Some(EventKind::DeviceActivated),
            "device_deactivated" | "domophone_deactivated" | "domophone_unactive" => {
                Some(EventKind::DeviceDeactivated)
            }
            _ => None,
        }
    }
}

/// 设备上报（或系统生成）的事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub event_id: String,
    pub device_address: String,
    pub kind: EventKind,
    pub apartment: Option<Apartment>,
    pub key_id: Option<String>,
    pub ts_ms: i64,
}

/// 状态快照日志。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLog {
    pub log_id: String,
    pub device_address: String,
    pub logged_at_ms: i64,
    pub sequence: Option<u64>,
    pub status: DeviceStatus,
    pub door: DoorState,
    pub keys: BTreeMap<Apartment, Vec<String>>,
    pub message: String,
}
