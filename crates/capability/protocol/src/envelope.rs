//! 报文信封：上行解码与下行编码

use crate::error::ProtocolError;
use crate::topic::{Channel, TopicRoute};
use domain::{Apartment, CommandKind, CommandRecord, DeviceStatus, DoorState, EventKind};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 小于该值的时间戳按秒处理。
const SECONDS_THRESHOLD: i64 = 100_000_000_000;

/// 报文类型（信封 `type` 字段）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Status,
    DoorEvent,
    KeyEvent,
    CallEvent,
    Command,
    CommandAck,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Status => "status",
            MessageType::DoorEvent => "door_event",
            MessageType::KeyEvent => "key_event",
            MessageType::CallEvent => "call_event",
            MessageType::Command => "command",
            MessageType::CommandAck => "command_ack",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "status" => Some(MessageType::Status),
            "door_event" => Some(MessageType::DoorEvent),
            "key_event" => Some(MessageType::KeyEvent),
            "call_event" => Some(MessageType::CallEvent),
            "command" => Some(MessageType::Command),
            "command_ack" | "ack" => Some(MessageType::CommandAck),
            _ => None,
        }
    }
}

/// 报文排序依据：优先使用设备序号，否则使用设备时间戳。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderKey {
    pub sequence: Option<u64>,
    pub timestamp_ms: Option<i64>,
}

/// 状态上报。`door`/`keys` 缺省时表示设备未上报该字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: DeviceStatus,
    pub door: Option<DoorState>,
    pub keys: Option<BTreeMap<Apartment, Vec<String>>>,
    pub model: Option<String>,
    pub location: Option<String>,
}

/// 设备事件上报。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReport {
    pub kind: EventKind,
    pub apartment: Option<Apartment>,
    pub key_id: Option<String>,
}

/// 命令回执。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub command_id: String,
    pub ok: bool,
    pub command_kind: Option<CommandKind>,
    pub message: Option<String>,
}

/// 解码后的报文体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundBody {
    Status(StatusReport),
    Event(EventReport),
    CommandAck(CommandAck),
    /// 下行命令被回环收到（共享 broker 时可能出现），处理方忽略即可。
    Command { command_id: Option<String> },
}

impl InboundBody {
    pub fn message_type(&self) -> &'static str {
        match self {
            InboundBody::Status(_) => MessageType::Status.as_str(),
            InboundBody::Event(event) => match event.kind {
                EventKind::DoorOpened | EventKind::DoorClosed => MessageType::DoorEvent.as_str(),
                EventKind::KeyUsed => MessageType::KeyEvent.as_str(),
                EventKind::Call => MessageType::CallEvent.as_str(),
                EventKind::DeviceActivated | EventKind::DeviceDeactivated => "device_event",
            },
            InboundBody::CommandAck(_) => MessageType::CommandAck.as_str(),
            InboundBody::Command { .. } => MessageType::Command.as_str(),
        }
    }
}

/// 解码后的上行报文。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub device_address: String,
    pub order: OrderKey,
    pub body: InboundBody,
}

/// 原始信封（容忍旧固件的扁平格式）。
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(default, alias = "mac", alias = "deviceAddress")]
    device_address: Option<String>,
    #[serde(default, rename = "type", alias = "message_type")]
    message_type: Option<String>,
    #[serde(default, alias = "seq")]
    sequence: Option<u64>,
    #[serde(default, alias = "ts", alias = "ts_ms")]
    timestamp: Option<i64>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct StatusWire {
    #[serde(default, alias = "state")]
    status: Option<Value>,
    #[serde(default, alias = "door_status", alias = "door_state")]
    door: Option<String>,
    #[serde(default)]
    keys: Option<Value>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, alias = "adress", alias = "address")]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EventWire {
    #[serde(default, alias = "event_type")]
    event: Option<String>,
    #[serde(default, alias = "door_status", alias = "state")]
    door: Option<String>,
    #[serde(default, alias = "flat_number", alias = "flat")]
    apartment: Option<Value>,
    #[serde(default, alias = "key", alias = "key_number")]
    key_id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct AckWire {
    #[serde(default, alias = "commandId", alias = "id")]
    command_id: Option<String>,
    #[serde(default = "default_ok", alias = "success")]
    ok: bool,
    #[serde(default, alias = "command")]
    command_kind: Option<String>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

fn default_ok() -> bool {
    true
}

/// 设备时间戳统一为毫秒。
pub fn normalize_ts_ms(value: i64) -> i64 {
    if value > 0 && value < SECONDS_THRESHOLD {
        value * 1000
    } else {
        value
    }
}

/// 解码上行报文。
///
/// `route` 为 topic 解析结果；信封缺少地址时以 topic 为准，两者不一致时报错。
pub fn decode_inbound(
    route: Option<&TopicRoute>,
    payload: &[u8],
) -> Result<InboundMessage, ProtocolError> {
    let wire: WireEnvelope = serde_json::from_slice(payload)?;

    let device_address = match (wire.device_address.as_deref().map(str::trim), route) {
        (Some(envelope), Some(route)) if !envelope.is_empty() => {
            if envelope != route.device_address {
                return Err(ProtocolError::AddressMismatch {
                    topic: route.device_address.clone(),
                    envelope: envelope.to_string(),
                });
            }
            envelope.to_string()
        }
        (Some(envelope), None) if !envelope.is_empty() => envelope.to_string(),
        (_, Some(route)) => route.device_address.clone(),
        _ => return Err(ProtocolError::MissingField("device_address")),
    };

    let order = OrderKey {
        sequence: wire.sequence,
        timestamp_ms: wire.timestamp.map(normalize_ts_ms),
    };

    // 有 payload 时使用 payload，否则把信封其余字段当作报文体（旧固件扁平格式）。
    let body_value = match wire.payload {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::Null) | None => Value::Object(wire.rest),
        Some(other) => {
            return Err(ProtocolError::InvalidPayload(format!(
                "payload must be an object, got {other}"
            )));
        }
    };

    let body = match wire.message_type.as_deref() {
        Some(raw) => {
            let message_type =
                MessageType::parse(raw).ok_or_else(|| ProtocolError::UnknownType(raw.to_string()))?;
            decode_typed(message_type, body_value)?
        }
        None => decode_legacy(route.map(|r| r.channel), body_value)?,
    };

    Ok(InboundMessage {
        device_address,
        order,
        body,
    })
}

fn decode_typed(message_type: MessageType, body: Value) -> Result<InboundBody, ProtocolError> {
    match message_type {
        MessageType::Status => decode_status(body).map(InboundBody::Status),
        MessageType::DoorEvent => {
            let wire: EventWire = serde_json::from_value(body)?;
            let kind = match (wire.event.as_deref(), wire.door.as_deref()) {
                (Some(event), _) => EventKind::parse(event)
                    .filter(|k| matches!(k, EventKind::DoorOpened | EventKind::DoorClosed))
                    .ok_or_else(|| ProtocolError::InvalidPayload(format!("door event {event}")))?,
                (None, Some(door)) => match DoorState::parse(door) {
                    DoorState::Open => EventKind::DoorOpened,
                    DoorState::Closed => EventKind::DoorClosed,
                    DoorState::Unknown => {
                        return Err(ProtocolError::InvalidPayload(format!("door state {door}")));
                    }
                },
                (None, None) => return Err(ProtocolError::MissingField("door")),
            };
            Ok(InboundBody::Event(EventReport {
                kind,
                apartment: None,
                key_id: None,
            }))
        }
        MessageType::KeyEvent => decode_event_with_kind(EventKind::KeyUsed, body),
        MessageType::CallEvent => decode_event_with_kind(EventKind::Call, body),
        MessageType::CommandAck => decode_ack(body).map(InboundBody::CommandAck),
        MessageType::Command => Ok(InboundBody::Command {
            command_id: body
                .get("command_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
    }
}

fn decode_legacy(channel: Option<Channel>, body: Value) -> Result<InboundBody, ProtocolError> {
    match channel {
        Some(Channel::Status) => decode_status(body).map(InboundBody::Status),
        Some(Channel::Events) => {
            if body.get("command_id").is_some() {
                return decode_ack(body).map(InboundBody::CommandAck);
            }
            let wire: EventWire = serde_json::from_value(body)?;
            let raw = wire.event.clone().ok_or(ProtocolError::MissingField("type"))?;
            let kind = EventKind::parse(&raw).ok_or(ProtocolError::UnknownType(raw))?;
            event_report(kind, wire).map(InboundBody::Event)
        }
        Some(Channel::Commands) => Ok(InboundBody::Command { command_id: None }),
        None => Err(ProtocolError::MissingField("type")),
    }
}

fn decode_status(body: Value) -> Result<StatusReport, ProtocolError> {
    let wire: StatusWire = serde_json::from_value(body)?;
    let status = match wire.status {
        Some(Value::String(s)) => DeviceStatus::parse(&s),
        Some(Value::Bool(true)) => DeviceStatus::Online,
        Some(Value::Bool(false)) => DeviceStatus::Offline,
        Some(other) => {
            return Err(ProtocolError::InvalidPayload(format!("status {other}")));
        }
        None => return Err(ProtocolError::MissingField("status")),
    };
    let keys = match wire.keys {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_grouped_keys(&value)?),
    };
    Ok(StatusReport {
        status,
        door: wire.door.as_deref().map(DoorState::parse),
        keys,
        model: wire.model.filter(|m| !m.trim().is_empty()),
        location: wire.location.filter(|l| !l.trim().is_empty()),
    })
}

fn decode_event_with_kind(kind: EventKind, body: Value) -> Result<InboundBody, ProtocolError> {
    let wire: EventWire = serde_json::from_value(body)?;
    event_report(kind, wire).map(InboundBody::Event)
}

fn event_report(kind: EventKind, wire: EventWire) -> Result<EventReport, ProtocolError> {
    let apartment = wire.apartment.as_ref().map(parse_apartment).transpose()?;
    let key_id = wire.key_id.as_ref().map(parse_key_id).transpose()?;
    match kind {
        EventKind::KeyUsed if key_id.is_none() => return Err(ProtocolError::MissingField("key_id")),
        EventKind::Call if apartment.is_none() => {
            return Err(ProtocolError::MissingField("apartment"));
        }
        _ => {}
    }
    Ok(EventReport {
        kind,
        apartment,
        key_id,
    })
}

fn decode_ack(body: Value) -> Result<CommandAck, ProtocolError> {
    let wire: AckWire = serde_json::from_value(body)?;
    let command_id = wire
        .command_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ProtocolError::MissingField("command_id"))?;
    Ok(CommandAck {
        command_id,
        ok: wire.ok,
        command_kind: wire.command_kind.as_deref().and_then(CommandKind::parse),
        message: wire.message,
    })
}

fn parse_apartment(value: &Value) -> Result<Apartment, ProtocolError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .filter(|n| *n >= 1 && *n <= u64::from(Apartment::MAX))
        .map(|n| n as Apartment)
        .ok_or_else(|| ProtocolError::InvalidPayload(format!("apartment {value}")))
}

/// key_id 统一为字符串；数字形式的 key 按十进制转换。
fn parse_key_id(value: &Value) -> Result<String, ProtocolError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ProtocolError::InvalidPayload(format!("key id {other}"))),
    }
}

/// 解析分组钥匙：`{ "12": ["K1", 42] }`，或数组形式 `[{ "apartment": 12, "keys": [..] }]`。
fn parse_grouped_keys(value: &Value) -> Result<BTreeMap<Apartment, Vec<String>>, ProtocolError> {
    if let Value::Array(items) = value {
        return parse_key_entries(items);
    }
    let map = value
        .as_object()
        .ok_or_else(|| ProtocolError::InvalidPayload("keys must be an object".to_string()))?;
    let mut grouped = BTreeMap::new();
    for (apartment, keys) in map {
        let apartment = parse_apartment(&Value::String(apartment.clone()))?;
        let keys = keys
            .as_array()
            .ok_or_else(|| ProtocolError::InvalidPayload(format!("keys of {apartment}")))?
            .iter()
            .map(parse_key_id)
            .collect::<Result<Vec<_>, _>>()?;
        grouped.insert(apartment, keys);
    }
    Ok(grouped)
}

fn parse_key_entries(items: &[Value]) -> Result<BTreeMap<Apartment, Vec<String>>, ProtocolError> {
    let mut grouped: BTreeMap<Apartment, Vec<String>> = BTreeMap::new();
    for item in items {
        let apartment = item
            .get("apartment")
            .or_else(|| item.get("flat_number"))
            .ok_or(ProtocolError::MissingField("apartment"))?;
        let apartment = parse_apartment(apartment)?;
        let entry = grouped.entry(apartment).or_default();
        match (item.get("keys"), item.get("key_id").or_else(|| item.get("key"))) {
            (Some(Value::Array(keys)), _) => {
                for key in keys {
                    entry.push(parse_key_id(key)?);
                }
            }
            (_, Some(key)) => entry.push(parse_key_id(key)?),
            _ => return Err(ProtocolError::MissingField("keys")),
        }
    }
    Ok(grouped)
}

/// 下行/上行报文信封构造器。
#[derive(Debug, Clone)]
pub struct Envelope {
    device_address: String,
    message_type: MessageType,
    sequence: Option<u64>,
    timestamp_ms: i64,
    payload: Value,
}

impl Envelope {
    pub fn new(
        device_address: impl Into<String>,
        message_type: MessageType,
        timestamp_ms: i64,
        payload: Value,
    ) -> Self {
        Self {
            device_address: device_address.into(),
            message_type,
            sequence: None,
            timestamp_ms,
            payload,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "device_address".to_string(),
            Value::String(self.device_address.clone()),
        );
        map.insert(
            "type".to_string(),
            Value::String(self.message_type.as_str().to_string()),
        );
        if let Some(sequence) = self.sequence {
            map.insert("sequence".to_string(), Value::from(sequence));
        }
        map.insert("timestamp".to_string(), Value::from(self.timestamp_ms));
        map.insert("payload".to_string(), self.payload.clone());
        Value::Object(map)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(&self.to_value())?)
    }
}

/// 编码下行命令：`payload = { command_id, command_kind, ...参数 }`。
pub fn encode_command(record: &CommandRecord) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = match serde_json::to_value(&record.payload)? {
        Value::Object(map) => map,
        other => {
            return Err(ProtocolError::InvalidPayload(format!(
                "command payload is not an object: {other}"
            )));
        }
    };
    payload.insert(
        "command_id".to_string(),
        Value::String(record.command_id.clone()),
    );
    Envelope::new(
        record.device_address.clone(),
        MessageType::Command,
        record.issued_at_ms,
        Value::Object(payload),
    )
    .to_bytes()
}
