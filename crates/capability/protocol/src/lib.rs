//! # 总线报文协议
//!
//! 中心服务与设备之间的全部通信都走发布/订阅总线，报文统一使用 JSON 信封：
//!
//! ```json
//! { "device_address": "AA:BB:CC", "type": "status", "sequence": 7,
//!   "timestamp": 1700000000000, "payload": { "status": "online", "door": "closed" } }
//! ```
//!
//! `type` 取值：`status`、`door_event`、`key_event`、`call_event`、`command`、`command_ack`。
//!
//! ## Topic 布局
//!
//! - 下行命令：`{prefix}/commands/{device_address}`
//! - 上行状态：`{prefix}/status/{device_address}`
//! - 上行事件与回执：`{prefix}/events/{device_address}`
//!
//! ## 兼容旧固件
//!
//! 缺少 `type` 的报文按 topic 通道归类：`status/…` 视为状态上报，
//! `events/…` 按 `event` 字段（`door_opened`、`key_used`、`call` 等）归类。
//! 字段别名：`mac` → `device_address`，`adress` → `location`，`door_status` → `door`。

mod envelope;
mod error;
mod topic;

pub use envelope::{
    CommandAck, Envelope, EventReport, InboundBody, InboundMessage, MessageType, OrderKey,
    StatusReport, decode_inbound, encode_command, normalize_ts_ms,
};
pub use error::ProtocolError;
pub use topic::{Channel, TopicLayout, TopicRoute};
