//! 设备内存存储实现

use crate::error::StorageError;
use crate::traits::DeviceStore;
use domain::Device;
use std::collections::HashMap;
use std::sync::RwLock;

/// 设备内存存储
pub struct InMemoryDeviceStore {
    devices: RwLock<HashMap<String, Device>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// 预置设备（测试用）
    pub fn with_devices(devices: Vec<Device>) -> Self {
        let map = devices
            .into_iter()
            .map(|device| (device.address.clone(), device))
            .collect();
        Self {
            devices: RwLock::new(map),
        }
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn save_device(&self, device: &Device) -> Result<(), StorageError> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        match devices.get(&device.address) {
            // 较新的记录已落盘，旧快照直接丢弃
            Some(existing) if existing.revision > device.revision => {}
            _ => {
                devices.insert(device.address.clone(), device.clone());
            }
        }
        Ok(())
    }

    async fn load_all_devices(&self) -> Result<Vec<Device>, StorageError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<Device> = devices.values().cloned().collect();
        items.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(items)
    }
}
