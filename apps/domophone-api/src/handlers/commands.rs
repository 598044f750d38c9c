//! 控制命令 handlers
//!
//! - GET /api/commands?limit=
//! - POST /api/commands
//! - GET /api/commands/{command_id}
//! - POST /api/commands/{command_id}/cancel
//!
//! 提交后立即返回 `pending` 记录，调用方轮询查询结果。

use crate::AppState;
use crate::handlers::clamp_limit;
use crate::utils::response::{command_to_dto, control_error, snapshot_to_dto};
use crate::utils::validation::{command_payload, normalize_required};
use api_contract::{ApiResponse, CommandDto, LimitQuery, SubmitCommandRequest};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domain::Intent;

/// 未指定操作人时记录的 actor
const ANONYMOUS_ACTOR: &str = "admin";

/// 列出命令历史
pub async fn list_commands(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match state.admin.list_commands(clamp_limit(query.limit)).await {
        Ok(items) => {
            let data: Vec<CommandDto> = items
                .into_iter()
                .map(command_to_dto)
                .collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => control_error(err),
    }
}

/// 下发命令
pub async fn submit_command(
    State(state): State<AppState>,
    Json(req): Json<SubmitCommandRequest>,
) -> Response {
    let payload = match command_payload(&req) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    let device_address = match normalize_required(req.device_address, "device_address") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let issued_by = req
        .issued_by
        .filter(|actor| !actor.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_ACTOR.to_string());
    let intent = Intent::new(device_address, payload, issued_by);
    match state.admin.submit_command(intent).await {
        Ok(handle) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(command_to_dto(handle.record()))),
        )
            .into_response(),
        Err(err) => control_error(err),
    }
}

/// 查询命令状态
pub async fn get_command(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
) -> Response {
    match state.admin.command_status(&command_id).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(ApiResponse::success(snapshot_to_dto(snapshot))),
        )
            .into_response(),
        Err(err) => control_error(err),
    }
}

/// 取消在途命令（已发布的报文不会撤回）
pub async fn cancel_command(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
) -> Response {
    match state.admin.cancel_command(&command_id).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(ApiResponse::success(snapshot_to_dto(snapshot))),
        )
            .into_response(),
        Err(err) => control_error(err),
    }
}
