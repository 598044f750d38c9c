#![allow(dead_code)]

use async_trait::async_trait;
use domain::{Device, now_epoch_ms};
use domophone_bus::{BusMessage, InMemoryBus, MessageBus, MessageHandler};
use domophone_control::{CommandDispatcher, DispatcherConfig};
use domophone_protocol::{Envelope, MessageType, TopicLayout};
use domophone_reconcile::{Reconciler, ReconcilerConfig, RetryPolicy, subscribe_all};
use domophone_registry::DeviceRegistry;
use domophone_storage::PersistenceSink;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub const BASE_TS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub bus: Arc<InMemoryBus>,
    pub registry: Arc<DeviceRegistry>,
    pub sink: PersistenceSink,
    pub dispatcher: Arc<CommandDispatcher>,
    pub reconciler: Arc<Reconciler>,
    pub layout: TopicLayout,
}

pub fn harness() -> Harness {
    harness_with(PersistenceSink::in_memory(), Duration::from_secs(5))
}

pub fn harness_with(sink: PersistenceSink, command_timeout: Duration) -> Harness {
    let bus = Arc::new(InMemoryBus::new());
    let registry = Arc::new(DeviceRegistry::new());
    let layout = TopicLayout::new("");
    let dispatcher = Arc::new(CommandDispatcher::new(
        registry.clone(),
        bus.clone(),
        sink.commands.clone(),
        layout.clone(),
        DispatcherConfig {
            command_timeout,
            ..DispatcherConfig::default()
        },
    ));
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        dispatcher.clone(),
        sink.clone(),
        layout.clone(),
        ReconcilerConfig {
            persist: RetryPolicy {
                max_retries: 1,
                backoff_ms: 0,
            },
            dedup_cache_size: 128,
        },
    ));
    Harness {
        bus,
        registry,
        sink,
        dispatcher,
        reconciler,
        layout,
    }
}

impl Harness {
    pub fn seed(&self, device: Device) {
        self.registry.seed(vec![device]);
    }

    /// 订阅上行 topic，并挂上一个模拟设备：收到命令即回复确认。
    pub async fn wire_bus_with_peer(&self) {
        subscribe_all(self.bus.as_ref(), &self.layout, self.reconciler.clone())
            .await
            .expect("subscribe");
        let peer = Arc::new(DevicePeer {
            bus: self.bus.clone(),
        });
        self.bus
            .subscribe("commands/+", peer)
            .await
            .expect("subscribe peer");
    }
}

pub fn status_message(address: &str, sequence: u64, body: Value) -> BusMessage {
    let bytes = Envelope::new(
        address,
        MessageType::Status,
        BASE_TS + sequence as i64,
        body,
    )
    .with_sequence(sequence)
    .to_bytes()
    .expect("encode");
    BusMessage::new(format!("status/{address}"), bytes)
}

pub fn event_message(address: &str, message_type: MessageType, sequence: u64, body: Value) -> BusMessage {
    let bytes = Envelope::new(address, message_type, BASE_TS + sequence as i64, body)
        .with_sequence(sequence)
        .to_bytes()
        .expect("encode");
    BusMessage::new(format!("events/{address}"), bytes)
}

pub fn ack_message(address: &str, command_id: &str, ok: bool) -> BusMessage {
    let bytes = Envelope::new(
        address,
        MessageType::CommandAck,
        now_epoch_ms(),
        json!({ "command_id": command_id, "ok": ok }),
    )
    .to_bytes()
    .expect("encode");
    BusMessage::new(format!("events/{address}"), bytes)
}

pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// 模拟设备：对每条下行命令回复成功确认。
struct DevicePeer {
    bus: Arc<InMemoryBus>,
}

#[async_trait]
impl MessageHandler for DevicePeer {
    async fn handle(&self, message: BusMessage) {
        let Ok(value) = serde_json::from_slice::<Value>(&message.payload) else {
            return;
        };
        let address = value["device_address"].as_str().unwrap_or_default().to_string();
        let command_id = value["payload"]["command_id"].as_str().unwrap_or_default();
        let ack = ack_message(&address, command_id, true);
        let _ = self.bus.publish(&ack.topic, ack.payload).await;
    }
}
