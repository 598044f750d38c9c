//! 协议错误类型定义

/// 报文解析/编码错误。报文解析失败只会被记录并丢弃，不会中断处理流。
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON 解析错误
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// 缺少必填字段
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// 无法识别的报文类型
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// 信封与 topic 中的设备地址不一致
    #[error("device address mismatch: topic {topic}, envelope {envelope}")]
    AddressMismatch { topic: String, envelope: String },

    /// 字段取值非法
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
