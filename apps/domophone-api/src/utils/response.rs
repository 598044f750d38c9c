//! HTTP 响应辅助函数和 DTO 转换
//!
//! - 错误响应：bad_request_error, control_error, storage_error
//! - DTO 转换：device_to_dto, event_to_dto, status_log_to_dto, command_to_dto

use api_contract::{ApiResponse, CommandDto, DeviceDto, EventDto, StatusLogDto};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::{CommandRecord, Device, DeviceEvent, StatusLog};
use domophone_control::{CommandSnapshot, ControlError};
use domophone_storage::StorageError;

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 存储错误响应
pub fn storage_error(err: StorageError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error("INTERNAL.ERROR", err.to_string())),
    )
        .into_response()
}

/// 控制链路错误响应：状态码与错误码按错误类型映射
pub fn control_error(err: ControlError) -> Response {
    let (status, code) = match &err {
        ControlError::DeviceUnknown(_) => (StatusCode::NOT_FOUND, "DEVICE.UNKNOWN"),
        ControlError::CommandNotFound(_) => (StatusCode::NOT_FOUND, "COMMAND.NOT_FOUND"),
        ControlError::DeviceInactive(_) => (StatusCode::CONFLICT, "DEVICE.INACTIVE"),
        ControlError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID.REQUEST"),
        ControlError::CommandTimedOut(_) => (StatusCode::GATEWAY_TIMEOUT, "COMMAND.TIMED_OUT"),
        ControlError::CommandRejected(_) => (StatusCode::CONFLICT, "COMMAND.REJECTED"),
        ControlError::Cancelled(_) => (StatusCode::CONFLICT, "COMMAND.CANCELLED"),
        ControlError::Dispatch(_) => (StatusCode::BAD_GATEWAY, "COMMAND.DISPATCH_FAILED"),
        ControlError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL.ERROR"),
    };
    (status, Json(ApiResponse::<()>::error(code, err.to_string()))).into_response()
}

/// Device 转 DeviceDto
pub fn device_to_dto(device: Device) -> DeviceDto {
    DeviceDto {
        keys: device.grouped_keys(),
        status: device.status.as_str().to_string(),
        door: device.door.as_str().to_string(),
        inactive_reason: device.inactive_reason.map(|r| r.as_str().to_string()),
        address: device.address,
        model: device.model,
        location: device.location,
        active: device.active,
        last_seen_ms: device.last_seen_ms,
        last_sequence: device.last_sequence,
    }
}

/// DeviceEvent 转 EventDto
pub fn event_to_dto(event: DeviceEvent) -> EventDto {
    EventDto {
        event_id: event.event_id,
        device_address: event.device_address,
        kind: event.kind.as_str().to_string(),
        apartment: event.apartment,
        key_id: event.key_id,
        ts_ms: event.ts_ms,
    }
}

/// StatusLog 转 StatusLogDto
pub fn status_log_to_dto(log: StatusLog) -> StatusLogDto {
    StatusLogDto {
        log_id: log.log_id,
        device_address: log.device_address,
        logged_at_ms: log.logged_at_ms,
        sequence: log.sequence,
        status: log.status.as_str().to_string(),
        door: log.door.as_str().to_string(),
        keys: log.keys,
        message: log.message,
    }
}

/// CommandRecord 转 CommandDto
pub fn command_to_dto(record: CommandRecord) -> CommandDto {
    let mut payload = serde_json::to_value(&record.payload).unwrap_or_default();
    if let Some(map) = payload.as_object_mut() {
        map.remove("command_kind");
    }
    CommandDto {
        command_kind: record.kind().as_str().to_string(),
        state: record.state.as_str().to_string(),
        command_id: record.command_id,
        device_address: record.device_address,
        payload,
        cancelled: record.cancelled,
        issued_by: record.issued_by,
        issued_at_ms: record.issued_at_ms,
        deadline_ms: record.deadline_ms,
        resolved_at_ms: record.resolved_at_ms,
    }
}

/// CommandSnapshot 转 CommandDto
pub fn snapshot_to_dto(snapshot: CommandSnapshot) -> CommandDto {
    command_to_dto(snapshot.record)
}
