//! 进程内总线（测试与本地联调）。

use crate::subscriptions::Subscriptions;
use crate::{BusError, BusMessage, MessageBus, MessageHandler};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// 进程内总线：发布的报文按订阅模式分发给处理器，并保留一份发布记录。
#[derive(Default)]
pub struct InMemoryBus {
    subscriptions: Subscriptions,
    published: Mutex<Vec<BusMessage>>,
    failures_remaining: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来的 `count` 次发布失败。
    pub fn fail_next_publishes(&self, count: u64) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// 已发布报文的快照（按发布顺序）。
    pub fn published(&self) -> Vec<BusMessage> {
        self.published
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// 指定 topic 上已发布的报文。
    pub fn published_to(&self, topic: &str) -> Vec<BusMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BusError::Publish("injected publish failure".to_string()));
        }
        let message = BusMessage::new(topic, payload);
        self.published
            .lock()
            .map_err(|_| BusError::Publish("lock failed".to_string()))?
            .push(message.clone());
        self.subscriptions.deliver(message);
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        self.subscriptions.add(pattern, handler);
        Ok(())
    }
}
