//! 设备 handlers
//!
//! - GET /api/devices
//! - POST /api/devices
//! - GET /api/devices/{address}

use crate::AppState;
use crate::utils::response::{control_error, device_to_dto};
use crate::utils::validation::normalize_required;
use api_contract::{ApiResponse, DeviceDto, RegisterDeviceRequest};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// 列出设备（注册表快照，按地址排序）
pub async fn list_devices(State(state): State<AppState>) -> Response {
    let data: Vec<DeviceDto> = state
        .admin
        .list_devices()
        .into_iter()
        .map(device_to_dto)
        .collect();
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 获取单个设备
pub async fn get_device(State(state): State<AppState>, Path(address): Path<String>) -> Response {
    match state.admin.get_device(&address) {
        Ok(device) => (
            StatusCode::OK,
            Json(ApiResponse::success(device_to_dto(device))),
        )
            .into_response(),
        Err(err) => control_error(err),
    }
}

/// 预注册设备
pub async fn register_device(
    State(state): State<AppState>,
    Json(req): Json<RegisterDeviceRequest>,
) -> Response {
    let address = match normalize_required(req.address, "address") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let model = req.model.unwrap_or_default();
    let location = req.location.unwrap_or_default();
    match state
        .admin
        .register_device(&address, &model, &location)
        .await
    {
        Ok(device) => (
            StatusCode::OK,
            Json(ApiResponse::success(device_to_dto(device))),
        )
            .into_response(),
        Err(err) => control_error(err),
    }
}
