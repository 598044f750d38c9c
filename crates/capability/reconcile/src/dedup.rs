//! 无序号报文的指纹去重缓存（容量有界，先进先出淘汰）。

use std::collections::{HashMap, VecDeque};

/// 报文签名：时间戳 + 报文体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageSignature {
    pub ts_ms: i64,
    pub body: String,
}

pub(crate) struct DedupCache {
    map: HashMap<String, (MessageSignature, u64)>,
    order: VecDeque<(String, u64)>,
    counter: u64,
    capacity: usize,
}

impl DedupCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            counter: 0,
            capacity,
        }
    }

    /// `key` 上最近一次的签名与本次相同则视为重复；否则记录本次签名。
    pub(crate) fn is_duplicate(&mut self, key: String, signature: MessageSignature) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if let Some((existing, _)) = self.map.get(&key) {
            if existing == &signature {
                return true;
            }
        }
        self.counter = self.counter.saturating_add(1);
        let token = self.counter;
        self.map.insert(key.clone(), (signature, token));
        self.order.push_back((key, token));
        while self.map.len() > self.capacity {
            let Some((evict_key, evict_token)) = self.order.pop_front() else {
                break;
            };
            let current = self
                .map
                .get(&evict_key)
                .is_some_and(|(_, token)| *token == evict_token);
            if current {
                self.map.remove(&evict_key);
            }
        }
        // 同一 key 被反复覆盖时，队列里会残留过期 token
        if self.order.len() > self.capacity.saturating_mul(2) {
            let map = &self.map;
            self.order
                .retain(|(key, token)| map.get(key).is_some_and(|(_, t)| t == token));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(ts_ms: i64, body: &str) -> MessageSignature {
        MessageSignature {
            ts_ms,
            body: body.to_string(),
        }
    }

    #[test]
    fn same_signature_is_duplicate() {
        let mut cache = DedupCache::new(10);
        assert!(!cache.is_duplicate("AA:status".into(), signature(1, "online")));
        assert!(cache.is_duplicate("AA:status".into(), signature(1, "online")));
        assert!(!cache.is_duplicate("AA:status".into(), signature(1, "offline")));
        assert!(!cache.is_duplicate("BB:status".into(), signature(1, "offline")));
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let mut cache = DedupCache::new(2);
        cache.is_duplicate("a".into(), signature(1, "x"));
        cache.is_duplicate("b".into(), signature(1, "x"));
        cache.is_duplicate("c".into(), signature(1, "x"));
        assert!(!cache.is_duplicate("a".into(), signature(1, "x")));
        assert!(cache.is_duplicate("c".into(), signature(1, "x")));
    }

    #[test]
    fn zero_capacity_disables_dedup() {
        let mut cache = DedupCache::new(0);
        assert!(!cache.is_duplicate("a".into(), signature(1, "x")));
        assert!(!cache.is_duplicate("a".into(), signature(1, "x")));
    }
}
