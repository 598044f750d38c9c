//! 进程内指标快照
//!
//! - GET /metrics

use api_contract::{ApiResponse, MetricsSnapshotDto};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domophone_telemetry::metrics;

pub async fn get_metrics() -> Response {
    let snapshot = metrics().snapshot();
    (
        StatusCode::OK,
        Json(ApiResponse::success(MetricsSnapshotDto {
            messages_received: snapshot.messages_received,
            status_applied: snapshot.status_applied,
            events_recorded: snapshot.events_recorded,
            dropped_stale: snapshot.dropped_stale,
            dropped_duplicate: snapshot.dropped_duplicate,
            protocol_errors: snapshot.protocol_errors,
            acks_applied: snapshot.acks_applied,
            acks_ignored: snapshot.acks_ignored,
            commands_issued: snapshot.commands_issued,
            command_dispatch_success: snapshot.command_dispatch_success,
            command_dispatch_failure: snapshot.command_dispatch_failure,
            commands_acknowledged: snapshot.commands_acknowledged,
            commands_rejected: snapshot.commands_rejected,
            commands_timed_out: snapshot.commands_timed_out,
            persist_retries: snapshot.persist_retries,
            persist_failures: snapshot.persist_failures,
            devices_deactivated: snapshot.devices_deactivated,
            command_issue_latency_ms_total: snapshot.command_issue_latency_ms_total,
            command_issue_latency_ms_count: snapshot.command_issue_latency_ms_count,
        })),
    )
        .into_response()
}
