/// 控制链路错误。
///
/// 校验与策略错误同步返回给提交者；超时、拒绝、取消是命令的软失败，
/// 已发布的报文不会被撤回。
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("device not found: {0}")]
    DeviceUnknown(String),
    #[error("device inactive: {0}")]
    DeviceInactive(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("command timed out: {0}")]
    CommandTimedOut(String),
    #[error("command rejected by device: {0}")]
    CommandRejected(String),
    #[error("command cancelled: {0}")]
    Cancelled(String),
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("dispatch error: {0}")]
    Dispatch(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<domophone_storage::StorageError> for ControlError {
    fn from(err: domophone_storage::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
