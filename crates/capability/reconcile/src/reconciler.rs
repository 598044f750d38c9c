//! 上行报文归并。

use crate::dedup::{DedupCache, MessageSignature};
use crate::retry::{RetryPolicy, persist_with_retry};
use async_trait::async_trait;
use dashmap::DashMap;
use domain::{
    CommandPayload, CommandRecord, Device, DeviceEvent, DeviceStatus, DoorState, EventKind,
    InactiveReason, StatusLog,
};
use domophone_bus::{BusError, BusMessage, MessageBus, MessageHandler};
use domophone_control::{AckResolution, CommandDispatcher};
use domophone_protocol::{
    CommandAck, EventReport, InboundBody, InboundMessage, OrderKey, StatusReport, TopicLayout,
    decode_inbound,
};
use domophone_registry::DeviceRegistry;
use domophone_storage::PersistenceSink;
use domophone_telemetry::{
    record_ack_applied, record_ack_ignored, record_dropped_duplicate, record_dropped_stale,
    record_event_recorded, record_message_received, record_protocol_error, record_status_applied,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// 归并器配置。
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub persist: RetryPolicy,
    pub dedup_cache_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            persist: RetryPolicy::default(),
            dedup_cache_size: 10_000,
        }
    }
}

/// 单条报文的处理结果。处理路径从不返回错误。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    StatusApplied,
    EventRecorded,
    /// 序号或时间戳低于水位。
    Stale,
    /// 与已应用的报文重复。
    Duplicate,
    AckApplied,
    AckRejected,
    /// 未知命令、重复回执或来源设备不符。
    AckIgnored,
    ProtocolError,
    /// 下行命令回环等无需处理的报文。
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    Stale,
    Duplicate,
}

/// 事件/状态归并器。
///
/// 同一设备的状态与事件报文在该设备的通道锁内串行处理（水位检查、追加日志、更新注册表），
/// 不同设备互不阻塞。命令回执按命令 id 匹配，不经过水位检查。
pub struct Reconciler {
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    sink: PersistenceSink,
    layout: TopicLayout,
    config: ReconcilerConfig,
    lanes: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    dedup: Mutex<DedupCache>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        dispatcher: Arc<CommandDispatcher>,
        sink: PersistenceSink,
        layout: TopicLayout,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            sink,
            layout,
            dedup: Mutex::new(DedupCache::new(config.dedup_cache_size)),
            config,
            lanes: DashMap::new(),
        }
    }

    /// 处理一条上行报文。
    pub async fn on_message(&self, message: BusMessage) -> ReconcileOutcome {
        record_message_received();
        let route = self.layout.parse(&message.topic);
        let inbound = match decode_inbound(route.as_ref(), &message.payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                record_protocol_error();
                warn!(
                    target: "domophone.reconcile",
                    topic = %message.topic,
                    payload_len = message.payload.len(),
                    error = %err,
                    "protocol_error"
                );
                return ReconcileOutcome::ProtocolError;
            }
        };
        debug!(
            target: "domophone.reconcile",
            device_address = %inbound.device_address,
            message_type = inbound.body.message_type(),
            sequence = ?inbound.order.sequence,
            timestamp_ms = ?inbound.order.timestamp_ms,
            "message_decoded"
        );
        let received_at_ms = message.received_at_ms;
        let InboundMessage {
            device_address,
            order,
            body,
        } = inbound;
        match body {
            InboundBody::CommandAck(ack) => self.apply_ack(&device_address, ack).await,
            InboundBody::Command { command_id } => {
                debug!(
                    target: "domophone.reconcile",
                    device_address = %device_address,
                    command_id = ?command_id,
                    "command_loopback_ignored"
                );
                ReconcileOutcome::Ignored
            }
            body => {
                let lane = self.lane(&device_address);
                let _guard = lane.lock().await;
                let device = self.registry.get(&device_address);
                match self.freshness(&device_address, device.as_ref(), &order, &body) {
                    Freshness::Stale => {
                        record_dropped_stale();
                        debug!(
                            target: "domophone.reconcile",
                            device_address = %device_address,
                            sequence = ?order.sequence,
                            timestamp_ms = ?order.timestamp_ms,
                            "message_stale"
                        );
                        return ReconcileOutcome::Stale;
                    }
                    Freshness::Duplicate => {
                        record_dropped_duplicate();
                        debug!(
                            target: "domophone.reconcile",
                            device_address = %device_address,
                            sequence = ?order.sequence,
                            "message_duplicate"
                        );
                        return ReconcileOutcome::Duplicate;
                    }
                    Freshness::Fresh => {}
                }
                match body {
                    InboundBody::Status(report) => {
                        self.apply_status(&device_address, device, order, report, received_at_ms)
                            .await
                    }
                    InboundBody::Event(report) => {
                        let known = device.is_some();
                        self.apply_event(&device_address, known, order, report, received_at_ms)
                            .await
                    }
                    InboundBody::CommandAck(_) | InboundBody::Command { .. } => {
                        ReconcileOutcome::Ignored
                    }
                }
            }
        }
    }

    fn lane(&self, device_address: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lanes
            .entry(device_address.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn freshness(
        &self,
        device_address: &str,
        device: Option<&Device>,
        order: &OrderKey,
        body: &InboundBody,
    ) -> Freshness {
        if let Some(sequence) = order.sequence {
            return match device.and_then(|d| d.last_sequence) {
                Some(watermark) if sequence == watermark => Freshness::Duplicate,
                Some(watermark) if sequence < watermark => Freshness::Stale,
                _ => Freshness::Fresh,
            };
        }
        let Some(ts_ms) = order.timestamp_ms else {
            return Freshness::Fresh;
        };
        if device
            .and_then(|d| d.last_report_ts)
            .is_some_and(|watermark| ts_ms < watermark)
        {
            return Freshness::Stale;
        }
        let key = format!("{}:{}", device_address, body.message_type());
        let signature = MessageSignature {
            ts_ms,
            body: format!("{body:?}"),
        };
        let Ok(mut cache) = self.dedup.lock() else {
            return Freshness::Fresh;
        };
        if cache.is_duplicate(key, signature) {
            Freshness::Duplicate
        } else {
            Freshness::Fresh
        }
    }

    async fn apply_status(
        &self,
        device_address: &str,
        before: Option<Device>,
        order: OrderKey,
        report: StatusReport,
        received_at_ms: i64,
    ) -> ReconcileOutcome {
        let seeds_keys = before.as_ref().is_none_or(|d| !d.keys_established());
        let drift = match (&before, &report.keys) {
            (Some(device), Some(keys)) if !seeds_keys => !device.keys_match(keys),
            _ => false,
        };
        if drift {
            warn!(
                target: "domophone.reconcile",
                device_address = %device_address,
                reported = ?report.keys,
                "key_set_drift"
            );
        }

        // 先落状态日志，再更新注册表
        let log = StatusLog {
            log_id: uuid::Uuid::new_v4().to_string(),
            device_address: device_address.to_string(),
            logged_at_ms: order.timestamp_ms.unwrap_or(received_at_ms),
            sequence: order.sequence,
            status: report.status,
            door: report
                .door
                .or(before.as_ref().map(|d| d.door))
                .unwrap_or(DoorState::Unknown),
            keys: report
                .keys
                .clone()
                .or_else(|| before.as_ref().map(Device::grouped_keys))
                .unwrap_or_default(),
            message: if drift {
                "key_set_drift".to_string()
            } else {
                String::new()
            },
        };
        let status_logs = self.sink.status_logs.clone();
        let _ = persist_with_retry(
            self.config.persist,
            "append_status_log",
            device_address,
            || status_logs.append_status_log(&log),
        )
        .await;

        let (device, reactivated) = self.registry.upsert(device_address, |slot| {
            let device = slot.get_or_insert_with(|| Device::new(device_address, "", ""));
            let seeds = !device.keys_established();
            device.status = report.status;
            if let Some(door) = report.door {
                device.door = door;
            }
            if let Some(model) = &report.model {
                device.model = model.clone();
            }
            if let Some(location) = &report.location {
                device.location = location.clone();
            }
            if seeds {
                if let Some(keys) = &report.keys {
                    device.replace_keys(keys);
                }
            }
            match report.status {
                DeviceStatus::Offline => {
                    if device.offline_since_ms.is_none() {
                        device.offline_since_ms = Some(received_at_ms);
                    }
                }
                DeviceStatus::Online => device.offline_since_ms = None,
                DeviceStatus::Unknown => {}
            }
            let reactivated = report.status == DeviceStatus::Online
                && !device.active
                && device.inactive_reason == Some(InactiveReason::OfflineTimeout);
            if reactivated {
                device.active = true;
                device.inactive_reason = None;
            }
            device.last_seen_ms = Some(received_at_ms);
            advance_watermark(device, &order);
            (device.clone(), reactivated)
        });
        record_status_applied();
        info!(
            target: "domophone.reconcile",
            device_address = %device_address,
            status = device.status.as_str(),
            door = device.door.as_str(),
            sequence = ?order.sequence,
            "status_applied"
        );

        if reactivated {
            info!(
                target: "domophone.reconcile",
                device_address = %device_address,
                "device_reactivated"
            );
            let event = DeviceEvent {
                event_id: event_id(
                    device_address,
                    EventKind::DeviceActivated,
                    &order,
                    received_at_ms,
                ),
                device_address: device_address.to_string(),
                kind: EventKind::DeviceActivated,
                apartment: None,
                key_id: None,
                ts_ms: received_at_ms,
            };
            self.append_event(&event).await;
        }
        self.persist_device(&device).await;
        ReconcileOutcome::StatusApplied
    }

    async fn apply_event(
        &self,
        device_address: &str,
        known_device: bool,
        order: OrderKey,
        report: EventReport,
        received_at_ms: i64,
    ) -> ReconcileOutcome {
        let event = DeviceEvent {
            event_id: event_id(device_address, report.kind, &order, received_at_ms),
            device_address: device_address.to_string(),
            kind: report.kind,
            apartment: report.apartment,
            key_id: report.key_id,
            ts_ms: order.timestamp_ms.unwrap_or(received_at_ms),
        };
        self.append_event(&event).await;
        record_event_recorded();
        info!(
            target: "domophone.reconcile",
            device_address = %device_address,
            event_kind = event.kind.as_str(),
            apartment = ?event.apartment,
            key_id = ?event.key_id,
            "event_recorded"
        );

        if !known_device {
            debug!(
                target: "domophone.reconcile",
                device_address = %device_address,
                "event_from_unregistered_device"
            );
            return ReconcileOutcome::EventRecorded;
        }
        let device = self.registry.update(device_address, |device| {
            match report.kind {
                EventKind::DoorOpened => device.door = DoorState::Open,
                EventKind::DoorClosed => device.door = DoorState::Closed,
                _ => {}
            }
            device.last_seen_ms = Some(received_at_ms);
            advance_watermark(device, &order);
            device.clone()
        });
        if let Some(device) = device {
            self.persist_device(&device).await;
        }
        ReconcileOutcome::EventRecorded
    }

    async fn apply_ack(&self, device_address: &str, ack: CommandAck) -> ReconcileOutcome {
        match self
            .dispatcher
            .resolve_ack(&ack.command_id, device_address, ack.ok)
            .await
        {
            AckResolution::Acknowledged(record) => {
                let Some(device) = self.registry.update(device_address, |device| {
                    apply_command_effect(device, &record);
                    device.clone()
                }) else {
                    warn!(
                        target: "domophone.reconcile",
                        device_address = %device_address,
                        command_id = %ack.command_id,
                        "ack_for_missing_device"
                    );
                    return ReconcileOutcome::AckApplied;
                };
                record_ack_applied();
                info!(
                    target: "domophone.reconcile",
                    device_address = %device_address,
                    command_id = %ack.command_id,
                    command_kind = record.kind().as_str(),
                    "ack_applied"
                );
                self.persist_device(&device).await;
                ReconcileOutcome::AckApplied
            }
            AckResolution::Rejected(record) => {
                warn!(
                    target: "domophone.reconcile",
                    device_address = %device_address,
                    command_id = %ack.command_id,
                    command_kind = record.kind().as_str(),
                    reason = ?ack.message,
                    "ack_rejected"
                );
                ReconcileOutcome::AckRejected
            }
            other => {
                record_ack_ignored();
                info!(
                    target: "domophone.reconcile",
                    device_address = %device_address,
                    command_id = %ack.command_id,
                    resolution = ?other,
                    "ack_ignored"
                );
                ReconcileOutcome::AckIgnored
            }
        }
    }

    async fn append_event(&self, event: &DeviceEvent) {
        let events = self.sink.events.clone();
        let _ = persist_with_retry(
            self.config.persist,
            "append_event",
            &event.device_address,
            || events.append_event(event),
        )
        .await;
    }

    /// 设备落盘；重试耗尽则标记待补写，内存状态不回滚。
    async fn persist_device(&self, device: &Device) {
        let devices = self.sink.devices.clone();
        let saved = persist_with_retry(
            self.config.persist,
            "save_device",
            &device.address,
            || devices.save_device(device),
        )
        .await;
        if saved.is_err() {
            self.registry.mark_dirty(&device.address);
        }
    }
}

#[async_trait]
impl MessageHandler for Reconciler {
    async fn handle(&self, message: BusMessage) {
        self.on_message(message).await;
    }
}

/// 在总线上订阅全部上行 topic。
pub async fn subscribe_all(
    bus: &dyn MessageBus,
    layout: &TopicLayout,
    reconciler: Arc<Reconciler>,
) -> Result<(), BusError> {
    for pattern in layout.inbound_patterns() {
        bus.subscribe(&pattern, reconciler.clone()).await?;
        info!(target: "domophone.reconcile", pattern = %pattern, "inbound_subscribed");
    }
    Ok(())
}

/// 已确认命令对设备状态的影响。门与呼叫类命令的结果以设备后续上报为准。
fn apply_command_effect(device: &mut Device, record: &CommandRecord) {
    if let Some(mutation) = record.payload.key_mutation() {
        device.apply_key_mutation(&mutation);
        return;
    }
    match record.payload {
        CommandPayload::MakeActive => {
            device.active = true;
            device.inactive_reason = None;
        }
        CommandPayload::MakeUnactive => {
            device.active = false;
            device.inactive_reason = Some(InactiveReason::Administrative);
        }
        _ => {}
    }
}

fn advance_watermark(device: &mut Device, order: &OrderKey) {
    if let Some(sequence) = order.sequence {
        device.last_sequence = Some(device.last_sequence.map_or(sequence, |w| w.max(sequence)));
    }
    if let Some(ts_ms) = order.timestamp_ms {
        device.last_report_ts = Some(device.last_report_ts.map_or(ts_ms, |w| w.max(ts_ms)));
    }
}

/// 稳定事件 ID：同一报文重放得到同一 ID。
pub(crate) fn event_id(
    device_address: &str,
    kind: EventKind,
    order: &OrderKey,
    fallback_ts_ms: i64,
) -> String {
    let name = match (order.sequence, order.timestamp_ms) {
        (Some(sequence), _) => format!("{device_address}|{}|seq:{sequence}", kind.as_str()),
        (None, Some(ts_ms)) => format!("{device_address}|{}|ts:{ts_ms}", kind.as_str()),
        (None, None) => format!("{device_address}|{}|rx:{fallback_ts_ms}", kind.as_str()),
    };
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}
