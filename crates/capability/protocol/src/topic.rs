//! Topic 布局与解析

/// 总线通道。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Commands,
    Status,
    Events,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Commands => "commands",
            Channel::Status => "status",
            Channel::Events => "events",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "commands" => Some(Channel::Commands),
            "status" => Some(Channel::Status),
            "events" => Some(Channel::Events),
            _ => None,
        }
    }
}

/// 从 topic 解析出的通道与设备地址。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoute {
    pub channel: Channel,
    pub device_address: String,
}

/// Topic 布局：`{prefix}/{channel}/{device_address}`，prefix 可为空。
#[derive(Debug, Clone, Default)]
pub struct TopicLayout {
    prefix: String,
}

impl TopicLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn topic(&self, channel: Channel, device_address: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}/{}", channel.as_str(), device_address)
        } else {
            format!("{}/{}/{}", self.prefix, channel.as_str(), device_address)
        }
    }

    pub fn command_topic(&self, device_address: &str) -> String {
        self.topic(Channel::Commands, device_address)
    }

    pub fn status_topic(&self, device_address: &str) -> String {
        self.topic(Channel::Status, device_address)
    }

    pub fn events_topic(&self, device_address: &str) -> String {
        self.topic(Channel::Events, device_address)
    }

    /// 上行订阅模式（状态 + 事件/回执）。
    pub fn inbound_patterns(&self) -> Vec<String> {
        vec![self.topic(Channel::Status, "+"), self.topic(Channel::Events, "+")]
    }

    /// 解析 topic；不属于本布局的 topic 返回 `None`。
    pub fn parse(&self, topic: &str) -> Option<TopicRoute> {
        let topic = topic.trim_matches('/');
        let rest = if self.prefix.is_empty() {
            topic
        } else {
            topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?
        };
        let (channel, address) = rest.split_once('/')?;
        let channel = Channel::parse(channel)?;
        if address.is_empty() || address.contains('/') {
            return None;
        }
        Some(TopicRoute {
            channel,
            device_address: address.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_without_prefix() {
        let layout = TopicLayout::new("");
        assert_eq!(layout.command_topic("AA:BB:CC"), "commands/AA:BB:CC");
        assert_eq!(layout.inbound_patterns(), vec!["status/+", "events/+"]);
    }

    #[test]
    fn parse_respects_prefix() {
        let layout = TopicLayout::new("/domophone/");
        assert_eq!(layout.status_topic("AA"), "domophone/status/AA");
        let route = layout.parse("domophone/events/AA:BB").expect("route");
        assert_eq!(route.channel, Channel::Events);
        assert_eq!(route.device_address, "AA:BB");
        assert!(layout.parse("other/events/AA").is_none());
        assert!(layout.parse("domophone/events/AA/extra").is_none());
        assert!(layout.parse("domophone/unknown/AA").is_none());
    }
}
