//! 管理接口：供外部 Web 层调用的查询与命令入口。

use crate::dispatcher::CommandDispatcher;
use crate::error::ControlError;
use crate::pending::{CommandHandle, CommandSnapshot};
use domain::{CommandRecord, Device, DeviceEvent, Intent, StatusLog};
use domophone_registry::DeviceRegistry;
use domophone_storage::PersistenceSink;
use std::sync::Arc;
use tracing::{info, warn};

/// 管理服务。设备列表读取内存注册表；事件、日志与命令历史读取持久化。
#[derive(Clone)]
pub struct AdminService {
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    sink: PersistenceSink,
}

impl AdminService {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        dispatcher: Arc<CommandDispatcher>,
        sink: PersistenceSink,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            sink,
        }
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.registry.list()
    }

    pub fn get_device(&self, address: &str) -> Result<Device, ControlError> {
        self.registry
            .get(address)
            .ok_or_else(|| ControlError::DeviceUnknown(address.to_string()))
    }

    /// 预注册设备；已存在时只更新型号与安装位置。
    ///
    /// 落盘失败不影响返回结果：设备标记为待补写，由后台任务重试。
    pub async fn register_device(
        &self,
        address: &str,
        model: &str,
        location: &str,
    ) -> Result<Device, ControlError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ControlError::Validation("address is empty".to_string()));
        }
        if address.contains('/') || address.contains('+') || address.contains('#') {
            return Err(ControlError::Validation(format!(
                "address {address} contains topic separators"
            )));
        }
        let (device, created) = self.registry.upsert(address, |slot| {
            let created = slot.is_none();
            let device = slot.get_or_insert_with(|| Device::new(address, "", ""));
            if !model.trim().is_empty() {
                device.model = model.trim().to_string();
            }
            if !location.trim().is_empty() {
                device.location = location.trim().to_string();
            }
            (device.clone(), created)
        });
        info!(
            target: "domophone.control",
            device_address = %address,
            created = created,
            "device_registered"
        );
        if let Err(err) = self.sink.devices.save_device(&device).await {
            self.registry.mark_dirty(address);
            warn!(
                target: "domophone.control",
                device_address = %address,
                error = %err,
                "device_persist_deferred"
            );
        }
        Ok(device)
    }

    pub async fn list_events(&self, limit: usize) -> Result<Vec<DeviceEvent>, ControlError> {
        Ok(self.sink.events.list_events(limit).await?)
    }

    pub async fn list_status_logs(&self, limit: usize) -> Result<Vec<StatusLog>, ControlError> {
        Ok(self.sink.status_logs.list_status_logs(limit).await?)
    }

    pub async fn list_commands(&self, limit: usize) -> Result<Vec<CommandRecord>, ControlError> {
        Ok(self.sink.commands.list_commands(limit).await?)
    }

    pub async fn submit_command(&self, intent: Intent) -> Result<CommandHandle, ControlError> {
        self.dispatcher.submit(intent).await
    }

    pub async fn command_status(&self, command_id: &str) -> Result<CommandSnapshot, ControlError> {
        self.dispatcher.status(command_id).await
    }

    pub async fn cancel_command(&self, command_id: &str) -> Result<CommandSnapshot, ControlError> {
        self.dispatcher.cancel(command_id).await
    }
}
