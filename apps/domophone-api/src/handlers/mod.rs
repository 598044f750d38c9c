//! Handlers 模块

pub mod commands;
pub mod devices;
pub mod history;
pub mod metrics;

pub use commands::*;
pub use devices::*;
pub use history::*;
pub use metrics::*;

use axum::{Json, response::IntoResponse};

/// 默认与最大列表条数
pub(crate) const DEFAULT_LIMIT: usize = 100;
pub(crate) const MAX_LIMIT: usize = 1000;

pub(crate) fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}
