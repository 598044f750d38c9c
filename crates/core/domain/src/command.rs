//! 管理命令模型。

use crate::device::{Apartment, KeyMutation};
use serde::{Deserialize, Serialize};

/// 命令类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    OpenDoor,
    CloseDoor,
    AddKeys,
    RemoveKeys,
    MakeActive,
    MakeUnactive,
    CallToFlat,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::OpenDoor => "open_door",
            CommandKind::CloseDoor => "close_door",
            CommandKind::AddKeys => "add_keys",
            CommandKind::RemoveKeys => "remove_keys",
            CommandKind::MakeActive => "make_active",
            CommandKind::MakeUnactive => "make_unactive",
            CommandKind::CallToFlat => "call_to_flat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open_door" => Some(CommandKind::OpenDoor),
            "close_door" => Some(CommandKind::CloseDoor),
            "add_keys" => Some(CommandKind::AddKeys),
            "remove_keys" => Some(CommandKind::RemoveKeys),
            "make_active" => Some(CommandKind::MakeActive),
            "make_unactive" => Some(CommandKind::MakeUnactive),
            "call_to_flat" => Some(CommandKind::CallToFlat),
            _ => None,
        }
    }

    /// 是否要求目标设备处于启用状态。
    pub fn requires_active(&self) -> bool {
        matches!(
            self,
            CommandKind::OpenDoor | CommandKind::CloseDoor | CommandKind::CallToFlat
        )
    }
}

/// 命令载荷（按类型携带参数）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command_kind", rename_all = "snake_case")]
pub enum CommandPayload {
    OpenDoor,
    CloseDoor,
    AddKeys {
        apartment: Apartment,
        keys: Vec<String>,
    },
    RemoveKeys {
        apartment: Apartment,
        keys: Vec<String>,
    },
    MakeActive,
    MakeUnactive,
    CallToFlat {
        flat_number: Apartment,
    },
}

impl CommandPayload {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandPayload::OpenDoor => CommandKind::OpenDoor,
            CommandPayload::CloseDoor => CommandKind::CloseDoor,
            CommandPayload::AddKeys { .. } => CommandKind::AddKeys,
            CommandPayload::RemoveKeys { .. } => CommandKind::RemoveKeys,
            CommandPayload::MakeActive => CommandKind::MakeActive,
            CommandPayload::MakeUnactive => CommandKind::MakeUnactive,
            CommandPayload::CallToFlat { .. } => CommandKind::CallToFlat,
        }
    }

    /// 钥匙类命令对应的集合变更。
    pub fn key_mutation(&self) -> Option<KeyMutation> {
        match self {
            CommandPayload::AddKeys { apartment, keys } => Some(KeyMutation::Add {
                apartment: *apartment,
                keys: keys.clone(),
            }),
            CommandPayload::RemoveKeys { apartment, keys } => Some(KeyMutation::Remove {
                apartment: *apartment,
                keys: keys.clone(),
            }),
            _ => None,
        }
    }
}

/// 管理员意图：对单个设备执行一条命令。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub device_address: String,
    pub payload: CommandPayload,
    pub issued_by: String,
}

impl Intent {
    pub fn new(
        device_address: impl Into<String>,
        payload: CommandPayload,
        issued_by: impl Into<String>,
    ) -> Self {
        Self {
            device_address: device_address.into(),
            payload,
            issued_by: issued_by.into(),
        }
    }
}

/// 命令确认状态。`Pending` 之外均为终态，终态不可再变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Acknowledged,
    Rejected,
    TimedOut,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Pending => "pending",
            CommandState::Acknowledged => "acknowledged",
            CommandState::Rejected => "rejected",
            CommandState::TimedOut => "timed_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CommandState::Pending),
            "acknowledged" => Some(CommandState::Acknowledged),
            "rejected" => Some(CommandState::Rejected),
            "timed_out" => Some(CommandState::TimedOut),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandState::Pending)
    }

    pub fn to_u8(self) -> u8 {
        match self {
            CommandState::Pending => 0,
            CommandState::Acknowledged => 1,
            CommandState::Rejected => 2,
            CommandState::TimedOut => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CommandState::Acknowledged,
            2 => CommandState::Rejected,
            3 => CommandState::TimedOut,
            _ => CommandState::Pending,
        }
    }
}

/// 命令记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command_id: String,
    pub device_address: String,
    pub payload: CommandPayload,
    pub state: CommandState,
    pub issued_by: String,
    pub issued_at_ms: i64,
    pub deadline_ms: i64,
    pub resolved_at_ms: Option<i64>,
    /// 管理员已取消（只压制调用方通知，命令仍按回执或超时终结）。
    #[serde(default)]
    pub cancelled: bool,
}

impl CommandRecord {
    pub fn kind(&self) -> CommandKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_kind_tag() {
        let payload = CommandPayload::AddKeys {
            apartment: 12,
            keys: vec!["K1".to_string()],
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["command_kind"], "add_keys");
        assert_eq!(value["apartment"], 12);
        let back: CommandPayload = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.kind(), CommandKind::AddKeys);
    }

    #[test]
    fn only_door_and_call_commands_require_active() {
        assert!(CommandKind::CallToFlat.requires_active());
        assert!(CommandKind::OpenDoor.requires_active());
        assert!(!CommandKind::MakeActive.requires_active());
        assert!(!CommandKind::AddKeys.requires_active());
    }

    #[test]
    fn state_u8_mapping_is_stable() {
        for state in [
            CommandState::Pending,
            CommandState::Acknowledged,
            CommandState::Rejected,
            CommandState::TimedOut,
        ] {
            assert_eq!(CommandState::from_u8(state.to_u8()), state);
        }
        assert!(!CommandState::Pending.is_terminal());
    }
}
