/// 总线错误。
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connect error: {0}")]
    Connect(String),
    #[error("bus publish error: {0}")]
    Publish(String),
    #[error("bus subscribe error: {0}")]
    Subscribe(String),
}
