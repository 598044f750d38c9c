//! 追踪、请求 ID 生成与进程内计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub status_applied: u64,
    pub events_recorded: u64,
    pub dropped_stale: u64,
    pub dropped_duplicate: u64,
    pub protocol_errors: u64,
    pub acks_applied: u64,
    pub acks_ignored: u64,
    pub commands_issued: u64,
    pub command_dispatch_success: u64,
    pub command_dispatch_failure: u64,
    pub commands_acknowledged: u64,
    pub commands_rejected: u64,
    pub commands_timed_out: u64,
    pub persist_retries: u64,
    pub persist_failures: u64,
    pub devices_deactivated: u64,
    pub command_issue_latency_ms_total: u64,
    pub command_issue_latency_ms_count: u64,
}

/// 进程内计数器。
pub struct TelemetryMetrics {
    messages_received: AtomicU64,
    status_applied: AtomicU64,
    events_recorded: AtomicU64,
    dropped_stale: AtomicU64,
    dropped_duplicate: AtomicU64,
    protocol_errors: AtomicU64,
    acks_applied: AtomicU64,
    acks_ignored: AtomicU64,
    commands_issued: AtomicU64,
    command_dispatch_success: AtomicU64,
    command_dispatch_failure: AtomicU64,
    commands_acknowledged: AtomicU64,
    commands_rejected: AtomicU64,
    commands_timed_out: AtomicU64,
    persist_retries: AtomicU64,
    persist_failures: AtomicU64,
    devices_deactivated: AtomicU64,
    command_issue_latency_ms_total: AtomicU64,
    command_issue_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            status_applied: AtomicU64::new(0),
            events_recorded: AtomicU64::new(0),
            dropped_stale: AtomicU64::new(0),
            dropped_duplicate: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            acks_applied: AtomicU64::new(0),
            acks_ignored: AtomicU64::new(0),
            commands_issued: AtomicU64::new(0),
            command_dispatch_success: AtomicU64::new(0),
            command_dispatch_failure: AtomicU64::new(0),
            commands_acknowledged: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            commands_timed_out: AtomicU64::new(0),
            persist_retries: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            devices_deactivated: AtomicU64::new(0),
            command_issue_latency_ms_total: AtomicU64::new(0),
            command_issue_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            status_applied: self.status_applied.load(Ordering::Relaxed),
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            dropped_duplicate: self.dropped_duplicate.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            acks_applied: self.acks_applied.load(Ordering::Relaxed),
            acks_ignored: self.acks_ignored.load(Ordering::Relaxed),
            commands_issued: self.commands_issued.load(Ordering::Relaxed),
            command_dispatch_success: self.command_dispatch_success.load(Ordering::Relaxed),
            command_dispatch_failure: self.command_dispatch_failure.load(Ordering::Relaxed),
            commands_acknowledged: self.commands_acknowledged.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            commands_timed_out: self.commands_timed_out.load(Ordering::Relaxed),
            persist_retries: self.persist_retries.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            devices_deactivated: self.devices_deactivated.load(Ordering::Relaxed),
            command_issue_latency_ms_total: self
                .command_issue_latency_ms_total
                .load(Ordering::Relaxed),
            command_issue_latency_ms_count: self
                .command_issue_latency_ms_count
                .load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录上行报文接收次数。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录状态上报应用次数。
pub fn record_status_applied() {
    metrics().status_applied.fetch_add(1, Ordering::Relaxed);
}

/// 记录事件记录次数。
pub fn record_event_recorded() {
    metrics().events_recorded.fetch_add(1, Ordering::Relaxed);
}

/// 记录过期报文丢弃次数。
pub fn record_dropped_stale() {
    metrics().dropped_stale.fetch_add(1, Ordering::Relaxed);
}

/// 记录重复报文丢弃次数。
pub fn record_dropped_duplicate() {
    metrics().dropped_duplicate.fetch_add(1, Ordering::Relaxed);
}

/// 记录报文解析失败次数。
pub fn record_protocol_error() {
    metrics().protocol_errors.fetch_add(1, Ordering::Relaxed);
}

/// 记录回执生效次数。
pub fn record_ack_applied() {
    metrics().acks_applied.fetch_add(1, Ordering::Relaxed);
}

/// 记录回执忽略次数（未知命令、重复回执）。
pub fn record_ack_ignored() {
    metrics().acks_ignored.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令下发请求次数。
pub fn record_command_issued() {
    metrics().commands_issued.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令下发成功次数（总线发布成功）。
pub fn record_command_dispatch_success() {
    metrics().command_dispatch_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令下发失败次数（总线发布失败）。
pub fn record_command_dispatch_failure() {
    metrics().command_dispatch_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令确认次数。
pub fn record_command_acknowledged() {
    metrics().commands_acknowledged.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令被设备拒绝次数。
pub fn record_command_rejected() {
    metrics().commands_rejected.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令超时次数。
pub fn record_command_timed_out() {
    metrics().commands_timed_out.fetch_add(1, Ordering::Relaxed);
}

/// 记录持久化重试次数。
pub fn record_persist_retry() {
    metrics().persist_retries.fetch_add(1, Ordering::Relaxed);
}

/// 记录持久化重试耗尽次数。
pub fn record_persist_failure() {
    metrics().persist_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录离线超时自动停用次数。
pub fn record_device_deactivated() {
    metrics().devices_deactivated.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令下发耗时（毫秒，含校验、总线发布与持久化）。
pub fn record_command_issue_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .command_issue_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .command_issue_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
