//! 设备注册表。
//!
//! 设备状态的唯一权威来源。所有修改都经由 [`DeviceRegistry::upsert`]，
//! 在 DashMap 分片锁的 entry guard 下完成读改写：同一设备的两次更新不会交错，
//! 不同设备（通常位于不同分片）互不阻塞。
//!
//! 列表类读取只保证单个设备快照的一致性，不提供整表快照。

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use domain::Device;
use tracing::debug;

/// 设备注册表。
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Device>,
    /// 持久化重试耗尽、等待后台补写的设备。
    dirty: DashSet<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单个设备的快照。
    pub fn get(&self, address: &str) -> Option<Device> {
        self.devices.get(address).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    /// 全部设备快照，按地址排序。
    pub fn list(&self) -> Vec<Device> {
        let mut items: Vec<Device> = self
            .devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| a.address.cmp(&b.address));
        items
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// 原子读改写单个设备。
    ///
    /// `mutator` 拿到设备的可写副本（不存在时为 `None`，写入 `Some` 即创建）。
    /// 已存在设备的副本在交给 `mutator` 前 `revision` 已加一，`mutator` 内克隆出的快照
    /// 即带有本次写入的版本号。返回后副本整体写回并重建按住户分组的钥匙视图；
    /// 把槽位置为 `None` 不会删除设备。
    ///
    /// NOTE: `mutator` 运行在分片锁内，不得访问注册表自身或其他 DashMap，也不得 await。
    pub fn upsert<R>(&self, address: &str, mutator: impl FnOnce(&mut Option<Device>) -> R) -> R {
        match self.devices.entry(address.to_string()) {
            Entry::Occupied(mut occupied) => {
                let mut current = occupied.get().clone();
                current.revision += 1;
                let mut slot = Some(current);
                let result = mutator(&mut slot);
                if let Some(mut device) = slot {
                    device.address = address.to_string();
                    device.rebuild_apartments();
                    *occupied.get_mut() = device;
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                let result = mutator(&mut slot);
                if let Some(mut device) = slot {
                    device.address = address.to_string();
                    device.rebuild_apartments();
                    vacant.insert(device);
                    debug!(target: "domophone.registry", device_address = %address, "device_created");
                }
                result
            }
        }
    }

    /// 只修改已存在的设备；设备不存在时返回 `None`。
    pub fn update<R>(&self, address: &str, mutator: impl FnOnce(&mut Device) -> R) -> Option<R> {
        self.upsert(address, |slot| slot.as_mut().map(mutator))
    }

    /// 用持久化中的记录填充注册表，已存在的设备不覆盖。返回新增数量。
    pub fn seed(&self, devices: impl IntoIterator<Item = Device>) -> usize {
        let mut inserted = 0;
        for device in devices {
            let address = device.address.clone();
            let created = self.upsert(&address, |slot| {
                if slot.is_some() {
                    return false;
                }
                *slot = Some(device);
                true
            });
            if created {
                inserted += 1;
            }
        }
        inserted
    }

    pub fn mark_dirty(&self, address: &str) {
        self.dirty.insert(address.to_string());
    }

    pub fn is_dirty(&self, address: &str) -> bool {
        self.dirty.contains(address)
    }

    /// 取出并清空待补写设备列表。
    pub fn take_dirty(&self) -> Vec<String> {
        let addresses: Vec<String> = self.dirty.iter().map(|entry| entry.key().clone()).collect();
        for address in &addresses {
            self.dirty.remove(address);
        }
        addresses
    }
}
