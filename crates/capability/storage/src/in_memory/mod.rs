//! 内存存储实现模块
//!
//! 用于测试和未配置数据库时运行。

pub mod command;
pub mod device;
pub mod event;
pub mod status_log;

pub use command::*;
pub use device::*;
pub use event::*;
pub use status_log::*;

/// 取最近 `limit` 条（`limit == 0` 表示不限）。
pub(crate) fn newest_first<T: Clone>(
    items: &[T],
    limit: usize,
    key: impl Fn(&T) -> i64,
) -> Vec<T> {
    let mut items: Vec<T> = items.to_vec();
    // 稳定排序：同一时间戳下后写入的排在前面
    items.reverse();
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    if limit > 0 && items.len() > limit {
        items.truncate(limit);
    }
    items
}
