//! # 事件/状态归并
//!
//! 消费总线上行报文（状态、门事件、刷卡事件、呼叫事件、命令回执），
//! 按排序与幂等规则归并到设备注册表，并通过持久化出口留档。
//!
//! ```text
//! Bus ─▶ Reconciler::on_message ─▶ decode ─┬─ status/event ─▶ [device lane] 水位检查 ─▶ 日志 ─▶ Registry::upsert
//!                                          └─ command_ack ──▶ Dispatcher::resolve_ack ─▶ 钥匙增删 / 启停用
//! ```
//!
//! - 序号（或时间戳）不高于设备水位的报文丢弃；命令回执按命令 id 匹配，可重放。
//! - 钥匙集合只由 add_keys/remove_keys 回执修改（并集/差集），状态上报不覆盖已有钥匙。
//! - 持久化失败有界重试，内存状态不回滚；设备落盘失败时标记待补写。
//! - 任何报文的处理失败都不会中断后续报文。

mod dedup;
mod presence;
mod reconciler;
mod retry;

pub use presence::{PresenceWatchdog, flush_dirty, seed_registry, spawn_dirty_flusher};
pub use reconciler::{ReconcileOutcome, Reconciler, ReconcilerConfig, subscribe_all};
pub use retry::RetryPolicy;
