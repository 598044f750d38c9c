//! 后台维护：离线巡检、待补写设备落盘、启动时回填注册表。

use crate::reconciler::event_id;
use crate::retry::{RetryPolicy, persist_with_retry};
use domain::{DeviceEvent, DeviceStatus, EventKind, InactiveReason, now_epoch_ms};
use domophone_protocol::OrderKey;
use domophone_registry::DeviceRegistry;
use domophone_storage::{DeviceStore, PersistenceSink, StorageError};
use domophone_telemetry::record_device_deactivated;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 离线巡检：离线超过宽限期的设备自动停用。
pub struct PresenceWatchdog {
    registry: Arc<DeviceRegistry>,
    sink: PersistenceSink,
    grace: Duration,
    persist: RetryPolicy,
}

impl PresenceWatchdog {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        sink: PersistenceSink,
        grace: Duration,
        persist: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            sink,
            grace,
            persist,
        }
    }

    /// 执行一轮巡检，返回本轮停用的设备地址。
    ///
    /// 管理员停用的设备保持原因不变；条件在注册表锁内复核，期间上线的设备不受影响。
    pub async fn sweep(&self, now_ms: i64) -> Vec<String> {
        let grace_ms = self.grace.as_millis() as i64;
        let candidates: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|device| offline_expired(device, now_ms, grace_ms))
            .map(|device| device.address)
            .collect();

        let mut deactivated = Vec::new();
        for address in candidates {
            let updated = self.registry.update(&address, |device| {
                if !offline_expired(device, now_ms, grace_ms) {
                    return None;
                }
                device.active = false;
                device.inactive_reason = Some(InactiveReason::OfflineTimeout);
                Some(device.clone())
            });
            let Some(Some(device)) = updated else {
                continue;
            };
            record_device_deactivated();
            let offline_since = device.offline_since_ms.unwrap_or(now_ms);
            info!(
                target: "domophone.reconcile",
                device_address = %address,
                offline_since_ms = offline_since,
                grace_ms = grace_ms,
                "device_deactivated"
            );
            let event = DeviceEvent {
                event_id: event_id(
                    &address,
                    EventKind::DeviceDeactivated,
                    &OrderKey {
                        sequence: None,
                        timestamp_ms: Some(offline_since),
                    },
                    now_ms,
                ),
                device_address: address.clone(),
                kind: EventKind::DeviceDeactivated,
                apartment: None,
                key_id: None,
                ts_ms: now_ms,
            };
            let events = self.sink.events.clone();
            let _ = persist_with_retry(self.persist, "append_event", &address, || {
                events.append_event(&event)
            })
            .await;
            let devices = self.sink.devices.clone();
            let saved = persist_with_retry(self.persist, "save_device", &address, || {
                devices.save_device(&device)
            })
            .await;
            if saved.is_err() {
                self.registry.mark_dirty(&address);
            }
            deactivated.push(address);
        }
        deactivated
    }

    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep(now_epoch_ms()).await;
            }
        })
    }
}

fn offline_expired(device: &domain::Device, now_ms: i64, grace_ms: i64) -> bool {
    device.active
        && device.status == DeviceStatus::Offline
        && device
            .offline_since_ms
            .is_some_and(|since| now_ms - since >= grace_ms)
}

/// 重写全部待补写设备，返回成功数量。失败的设备重新标记。
pub async fn flush_dirty(registry: &DeviceRegistry, devices: &dyn DeviceStore) -> usize {
    let mut flushed = 0;
    for address in registry.take_dirty() {
        let Some(device) = registry.get(&address) else {
            continue;
        };
        match devices.save_device(&device).await {
            Ok(()) => flushed += 1,
            Err(err) => {
                registry.mark_dirty(&address);
                warn!(
                    target: "domophone.reconcile",
                    device_address = %address,
                    error = %err,
                    "dirty_flush_failed"
                );
            }
        }
    }
    flushed
}

pub fn spawn_dirty_flusher(
    registry: Arc<DeviceRegistry>,
    devices: Arc<dyn DeviceStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let flushed = flush_dirty(&registry, devices.as_ref()).await;
            if flushed > 0 {
                info!(target: "domophone.reconcile", flushed = flushed, "dirty_devices_flushed");
            }
        }
    })
}

/// 启动时用持久化中的设备填充注册表，返回新增数量。
pub async fn seed_registry(
    registry: &DeviceRegistry,
    devices: &dyn DeviceStore,
) -> Result<usize, StorageError> {
    let stored = devices.load_all_devices().await?;
    let total = stored.len();
    let inserted = registry.seed(stored);
    info!(
        target: "domophone.reconcile",
        stored = total,
        inserted = inserted,
        "registry_seeded"
    );
    Ok(inserted)
}
