//! 设备模型。
//!
//! 设备以硬件地址（MAC）作为唯一键。授权钥匙以扁平集合 `key_id → apartment`
//! 保存，按住户分组的视图由扁平集合派生，每次变更后重建。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 住户（房间）号，合法值从 1 开始。
pub type Apartment = u32;

/// 设备在线状态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unknown => "unknown",
        }
    }

    /// 宽松解析：无法识别的值视为 `Unknown`。
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "online" | "on" | "true" => DeviceStatus::Online,
            "offline" | "off" | "false" => DeviceStatus::Offline,
            _ => DeviceStatus::Unknown,
        }
    }
}

/// 门（磁力锁）状态。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    Open,
    Closed,
    #[default]
    Unknown,
}

impl DoorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorState::Open => "open",
            DoorState::Closed => "closed",
            DoorState::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" | "opened" => DoorState::Open,
            "closed" | "close" => DoorState::Closed,
            _ => DoorState::Unknown,
        }
    }
}

/// 设备被停用的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveReason {
    /// 管理员下发 make_unactive。
    Administrative,
    /// 离线超过宽限期，由巡检自动停用。
    OfflineTimeout,
}

impl InactiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InactiveReason::Administrative => "administrative",
            InactiveReason::OfflineTimeout => "offline_timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "administrative" => Some(InactiveReason::Administrative),
            "offline_timeout" => Some(InactiveReason::OfflineTimeout),
            _ => None,
        }
    }
}

/// 钥匙集合变更（来自 add_keys / remove_keys 回执）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KeyMutation {
    Add {
        apartment: Apartment,
        keys: Vec<String>,
    },
    Remove {
        apartment: Apartment,
        keys: Vec<String>,
    },
}

/// 设备记录（注册表中的权威状态）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub address: String,
    pub model: String,
    pub location: String,
    pub status: DeviceStatus,
    pub door: DoorState,
    keys: BTreeMap<String, Apartment>,
    #[serde(skip)]
    apartments: BTreeMap<Apartment, BTreeSet<String>>,
    pub active: bool,
    pub inactive_reason: Option<InactiveReason>,
    /// 最近一次被接受的上行报文时间。
    pub last_seen_ms: Option<i64>,
    /// 已应用的最大设备序号（去重/过期水位）。
    pub last_sequence: Option<u64>,
    /// 无序号报文的时间戳水位（毫秒）。
    pub last_report_ts: Option<i64>,
    pub offline_since_ms: Option<i64>,
    /// 钥匙集合是否已确立（首次上报播种或已应用过钥匙回执）。
    #[serde(default)]
    pub keys_seeded: bool,
    /// 注册表每次写入递增，持久化据此拒绝旧快照覆盖新记录。
    #[serde(default)]
    pub revision: u64,
}

impl Device {
    pub fn new(
        address: impl Into<String>,
        model: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            model: model.into(),
            location: location.into(),
            status: DeviceStatus::Unknown,
            door: DoorState::Unknown,
            keys: BTreeMap::new(),
            apartments: BTreeMap::new(),
            active: true,
            inactive_reason: None,
            last_seen_ms: None,
            last_sequence: None,
            last_report_ts: None,
            offline_since_ms: None,
            keys_seeded: false,
            revision: 0,
        }
    }

    /// 扁平钥匙集合：`key_id → apartment`。
    pub fn keys(&self) -> &BTreeMap<String, Apartment> {
        &self.keys
    }

    /// 按住户分组的派生视图。
    pub fn apartments(&self) -> &BTreeMap<Apartment, BTreeSet<String>> {
        &self.apartments
    }

    pub fn has_key(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    /// 是否曾收到过该设备的上行报文。
    pub fn has_reported(&self) -> bool {
        self.last_seen_ms.is_some()
    }

    /// 钥匙集合是否已确立；之后只有钥匙回执能改变它。
    pub fn keys_established(&self) -> bool {
        self.keys_seeded || self.has_reported()
    }

    /// 分组形式的钥匙集合（用于日志与持久化）。
    pub fn grouped_keys(&self) -> BTreeMap<Apartment, Vec<String>> {
        self.apartments
            .iter()
            .map(|(apartment, keys)| (*apartment, keys.iter().cloned().collect()))
            .collect()
    }

    /// 用分组集合整体替换钥匙。重复的 key_id 以最后出现的住户为准。
    pub fn replace_keys(&mut self, grouped: &BTreeMap<Apartment, Vec<String>>) {
        self.keys.clear();
        for (apartment, keys) in grouped {
            for key in keys {
                self.keys.insert(key.clone(), *apartment);
            }
        }
        self.keys_seeded = true;
        self.rebuild_apartments();
    }

    /// 应用一次钥匙变更，返回集合是否发生变化。
    ///
    /// Add 为并集（已存在的 key 归属到新的住户）；Remove 为差集，
    /// 只移除归属该住户的 key，不存在的 key 忽略。
    pub fn apply_key_mutation(&mut self, mutation: &KeyMutation) -> bool {
        let mut changed = false;
        self.keys_seeded = true;
        match mutation {
            KeyMutation::Add { apartment, keys } => {
                for key in keys {
                    if self.keys.insert(key.clone(), *apartment) != Some(*apartment) {
                        changed = true;
                    }
                }
            }
            KeyMutation::Remove { apartment, keys } => {
                for key in keys {
                    if self.keys.get(key) == Some(apartment) {
                        self.keys.remove(key);
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.rebuild_apartments();
        }
        changed
    }

    /// 与上报的分组钥匙是否一致。
    pub fn keys_match(&self, grouped: &BTreeMap<Apartment, Vec<String>>) -> bool {
        group_keys(grouped) == self.apartments
    }

    /// 从扁平集合重建分组视图。
    pub fn rebuild_apartments(&mut self) {
        let mut apartments: BTreeMap<Apartment, BTreeSet<String>> = BTreeMap::new();
        for (key, apartment) in &self.keys {
            apartments.entry(*apartment).or_default().insert(key.clone());
        }
        self.apartments = apartments;
    }
}

/// 将 `apartment → [key]` 规整为去重后的分组集合；同一 key 出现在多个住户时以编号最大者为准。
pub fn group_keys(
    grouped: &BTreeMap<Apartment, Vec<String>>,
) -> BTreeMap<Apartment, BTreeSet<String>> {
    let mut flat: BTreeMap<&str, Apartment> = BTreeMap::new();
    for (apartment, keys) in grouped {
        for key in keys {
            flat.insert(key.as_str(), *apartment);
        }
    }
    let mut result: BTreeMap<Apartment, BTreeSet<String>> = BTreeMap::new();
    for (key, apartment) in flat {
        result.entry(apartment).or_default().insert(key.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(apartment: Apartment, keys: &[&str]) -> KeyMutation {
        KeyMutation::Add {
            apartment,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn remove(apartment: Apartment, keys: &[&str]) -> KeyMutation {
        KeyMutation::Remove {
            apartment,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn add_and_remove_commute_for_distinct_keys() {
        let mut left = Device::new("AA:BB:CC", "m", "loc");
        left.apply_key_mutation(&add(1, &["A"]));
        let mut right = left.clone();

        left.apply_key_mutation(&add(1, &["B"]));
        left.apply_key_mutation(&remove(1, &["A"]));
        right.apply_key_mutation(&remove(1, &["A"]));
        right.apply_key_mutation(&add(1, &["B"]));

        assert_eq!(left, right);
        assert_eq!(left.keys().keys().cloned().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn removing_absent_key_is_noop() {
        let mut device = Device::new("AA:BB:CC", "m", "loc");
        device.apply_key_mutation(&add(12, &["K1"]));
        assert!(!device.apply_key_mutation(&remove(12, &["K9"])));
        assert!(!device.apply_key_mutation(&remove(7, &["K1"])));
        assert!(device.has_key("K1"));
    }

    #[test]
    fn apartment_view_follows_flat_set() {
        let mut device = Device::new("AA:BB:CC", "m", "loc");
        device.apply_key_mutation(&add(12, &["K1", "K2"]));
        device.apply_key_mutation(&add(3, &["K2"]));
        let apartments = device.apartments();
        assert_eq!(apartments.get(&12).map(|k| k.len()), Some(1));
        assert!(apartments.get(&3).is_some_and(|k| k.contains("K2")));

        device.apply_key_mutation(&remove(12, &["K1"]));
        assert!(device.apartments().get(&12).is_none());
    }

    #[test]
    fn deserialized_device_rebuilds_view() {
        let mut device = Device::new("AA:BB:CC", "m", "loc");
        device.apply_key_mutation(&add(5, &["K1"]));
        let json = serde_json::to_string(&device).expect("serialize");
        let mut restored: Device = serde_json::from_str(&json).expect("deserialize");
        assert!(restored.apartments().is_empty());
        restored.rebuild_apartments();
        assert_eq!(restored, device);
    }

    #[test]
    fn key_ack_establishes_key_set_before_any_report() {
        let mut device = Device::new("AA:BB:CC", "m", "loc");
        assert!(!device.keys_established());
        device.apply_key_mutation(&remove(12, &["K9"]));
        assert!(device.keys_established());
        assert!(!device.has_reported());
    }

    #[test]
    fn status_parse_is_lenient() {
        assert_eq!(DeviceStatus::parse("ONLINE"), DeviceStatus::Online);
        assert_eq!(DeviceStatus::parse("weird"), DeviceStatus::Unknown);
        assert_eq!(DoorState::parse("closed"), DoorState::Closed);
    }
}
