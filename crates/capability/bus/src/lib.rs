//! # 消息总线客户端
//!
//! 对发布/订阅总线的薄封装：`publish(topic, payload)` 与 `subscribe(pattern, handler)`。
//!
//! 只提供底层总线本身的保证（至少一次、无序、无事务），
//! 排序与幂等全部由上层的状态对账负责。
//!
//! ```text
//! ┌──────────────┐  publish   ┌─────────┐  deliver (spawn per message)  ┌────────────────┐
//! │  Dispatcher  │ ─────────▶ │   Bus   │ ────────────────────────────▶ │ MessageHandler │
//! └──────────────┘            └─────────┘                               └────────────────┘
//! ```
//!
//! 每条到达的报文为每个匹配的订阅者单独 spawn 一个任务，不同报文的处理可以并发交叠。

mod error;
mod memory;
mod mqtt;
mod pattern;
mod subscriptions;

pub use error::BusError;
pub use memory::InMemoryBus;
pub use mqtt::{MqttBus, MqttBusConfig, qos_from_u8};
pub use pattern::topic_matches;

use async_trait::async_trait;
use std::sync::Arc;

/// 总线上收到的一条报文。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at_ms: domain::now_epoch_ms(),
        }
    }
}

/// 报文处理回调。处理失败由实现方自行记录，不向总线返回错误。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BusMessage);
}

/// 总线客户端抽象。
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// 订阅 topic 模式（支持 MQTT 通配符 `+` 与 `#`）。
    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError>;
}
