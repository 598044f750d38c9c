//! 事件与状态日志查询
//!
//! - GET /api/events?limit=
//! - GET /api/status-logs?limit=

use crate::AppState;
use crate::handlers::clamp_limit;
use crate::utils::response::{control_error, event_to_dto, status_log_to_dto};
use api_contract::{ApiResponse, EventDto, LimitQuery, StatusLogDto};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match state.admin.list_events(clamp_limit(query.limit)).await {
        Ok(items) => {
            let data: Vec<EventDto> = items.into_iter().map(event_to_dto).collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => control_error(err),
    }
}

pub async fn list_status_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match state.admin.list_status_logs(clamp_limit(query.limit)).await {
        Ok(items) => {
            let data: Vec<StatusLogDto> = items.into_iter().map(status_log_to_dto).collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => control_error(err),
    }
}
