//! 订阅表与报文分发。

use crate::pattern::topic_matches;
use crate::{BusMessage, MessageHandler};
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub(crate) struct Subscriptions {
    entries: RwLock<Vec<(String, Arc<dyn MessageHandler>)>>,
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, pattern: &str, handler: Arc<dyn MessageHandler>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push((pattern.to_string(), handler));
        }
    }

    /// 已登记的订阅模式（去重），重连后用于重新订阅。
    pub(crate) fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .entries
            .read()
            .map(|entries| entries.iter().map(|(pattern, _)| pattern.clone()).collect())
            .unwrap_or_default();
        patterns.sort();
        patterns.dedup();
        patterns
    }

    fn matching(&self, topic: &str) -> Vec<Arc<dyn MessageHandler>> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(pattern, _)| topic_matches(pattern, topic))
                    .map(|(_, handler)| handler.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 为每个匹配的订阅者 spawn 一个处理任务，返回匹配数量。
    pub(crate) fn deliver(&self, message: BusMessage) -> usize {
        let handlers = self.matching(&message.topic);
        let count = handlers.len();
        for handler in handlers {
            let message = message.clone();
            tokio::spawn(async move {
                handler.handle(message).await;
            });
        }
        count
    }
}
