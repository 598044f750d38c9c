//! 输入验证辅助函数
//!
//! - normalize_required：必填字段去空格后非空
//! - command_payload：命令请求体转为领域载荷

use crate::utils::response::bad_request_error;
use api_contract::SubmitCommandRequest;
use axum::response::Response;
use domain::{CommandKind, CommandPayload};

/// 验证必填字段，去除空格并检查非空
pub fn normalize_required(value: String, field: &str) -> Result<String, Response> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(bad_request_error(format!("{field} required")));
    }
    Ok(trimmed.to_string())
}

/// 按命令类型组装载荷；参数的取值范围由下发器统一校验
pub fn command_payload(req: &SubmitCommandRequest) -> Result<CommandPayload, Response> {
    let kind = CommandKind::parse(req.command.trim())
        .ok_or_else(|| bad_request_error(format!("unknown command {}", req.command)))?;
    let apartment = || {
        req.apartment
            .ok_or_else(|| bad_request_error("apartment required"))
    };
    Ok(match kind {
        CommandKind::OpenDoor => CommandPayload::OpenDoor,
        CommandKind::CloseDoor => CommandPayload::CloseDoor,
        CommandKind::MakeActive => CommandPayload::MakeActive,
        CommandKind::MakeUnactive => CommandPayload::MakeUnactive,
        CommandKind::AddKeys => CommandPayload::AddKeys {
            apartment: apartment()?,
            keys: req.keys.clone(),
        },
        CommandKind::RemoveKeys => CommandPayload::RemoveKeys {
            apartment: apartment()?,
            keys: req.keys.clone(),
        },
        CommandKind::CallToFlat => CommandPayload::CallToFlat {
            flat_number: req
                .flat_number
                .or(req.apartment)
                .ok_or_else(|| bad_request_error("flat_number required"))?,
        },
    })
}
