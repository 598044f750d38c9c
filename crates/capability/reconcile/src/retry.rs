//! 持久化重试（有界指数退避）。

use domophone_storage::StorageError;
use domophone_telemetry::{record_persist_failure, record_persist_retry};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_BACKOFF_MS: u64 = 5_000;

/// 重试策略：首次失败后最多再试 `max_retries` 次，间隔从 `backoff_ms` 开始逐次翻倍。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u64,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次重试前的等待时长（从 1 开始）。
    pub fn backoff(&self, attempt: u64) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let delay = self.backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(MAX_BACKOFF_MS))
    }
}

/// 执行一次写入，失败按策略重试；预算耗尽返回最后一次错误。
pub(crate) async fn persist_with_retry<F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    device_address: &str,
    mut write: F,
) -> Result<(), StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StorageError>>,
{
    let mut attempt = 0u64;
    loop {
        match write().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    record_persist_failure();
                    warn!(
                        target: "domophone.reconcile",
                        operation = operation,
                        device_address = %device_address,
                        attempts = attempt,
                        error = %err,
                        "persist_failed"
                    );
                    return Err(err);
                }
                record_persist_retry();
                let delay = policy.backoff(attempt);
                warn!(
                    target: "domophone.reconcile",
                    operation = operation,
                    device_address = %device_address,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "persist_retry"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
