//! 稳定的 DTO 与 API 响应契约。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 分页上限查询参数（`?limit=`）。
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// 设备预注册请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    #[serde(alias = "device_address", alias = "mac")]
    pub address: String,
    pub model: Option<String>,
    pub location: Option<String>,
}

/// 设备返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub address: String,
    pub model: String,
    pub location: String,
    pub status: String,
    pub door: String,
    pub active: bool,
    pub inactive_reason: Option<String>,
    /// 按住户分组的钥匙。
    pub keys: BTreeMap<u32, Vec<String>>,
    pub last_seen_ms: Option<i64>,
    pub last_sequence: Option<u64>,
}

/// 事件返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub event_id: String,
    pub device_address: String,
    pub kind: String,
    pub apartment: Option<u32>,
    pub key_id: Option<String>,
    pub ts_ms: i64,
}

/// 状态日志返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusLogDto {
    pub log_id: String,
    pub device_address: String,
    pub logged_at_ms: i64,
    pub sequence: Option<u64>,
    pub status: String,
    pub door: String,
    pub keys: BTreeMap<u32, Vec<String>>,
    pub message: String,
}

/// 命令提交请求体。
///
/// `command` 为命令类型（`open_door`、`add_keys` 等），其余字段按类型选填。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommandRequest {
    #[serde(alias = "device_address")]
    pub device_address: String,
    #[serde(alias = "command_kind")]
    pub command: String,
    pub apartment: Option<u32>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(alias = "flat_number")]
    pub flat_number: Option<u32>,
    #[serde(alias = "issued_by")]
    pub issued_by: Option<String>,
}

/// 命令返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDto {
    pub command_id: String,
    pub device_address: String,
    pub command_kind: String,
    /// 命令参数（与下发报文的 payload 一致，不含 command_id）。
    pub payload: Value,
    pub state: String,
    pub cancelled: bool,
    pub issued_by: String,
    pub issued_at_ms: i64,
    pub deadline_ms: i64,
    pub resolved_at_ms: Option<i64>,
}

/// 指标快照。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshotDto {
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
