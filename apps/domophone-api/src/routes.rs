//! 路由定义
//!
//! - 健康检查与指标：/health, /metrics
//! - 设备：/api/devices, /api/devices/{address}
//! - 历史：/api/events, /api/status-logs
//! - 命令：/api/commands, /api/commands/{command_id}, /api/commands/{command_id}/cancel

use super::AppState;
use super::handlers::*;
use super::middleware::request_context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// 创建完整路由（含请求追踪中间件）
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(get_metrics))
        .nest("/api", create_api_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_context))
}

/// 管理面 API
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/devices", get(list_devices).post(register_device))
        .route("/devices/:address", get(get_device))
        .route("/events", get(list_events))
        .route("/status-logs", get(list_status_logs))
        .route("/commands", get(list_commands).post(submit_command))
        .route("/commands/:command_id", get(get_command))
        .route("/commands/:command_id/cancel", post(cancel_command))
}
