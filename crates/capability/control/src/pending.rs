//! 在途命令与调用方句柄。
//!
//! 终态转换是一次 `Pending → X` 的 compare-and-set：确认、拒绝与超时谁先观察到
//! `Pending` 谁生效，其余一方为空操作。取消标记与状态编码在同一个原子字节里，
//! 取消与终态转换同样只有一方能观察到 `Pending`。

use crate::error::ControlError;
use domain::{CommandRecord, CommandState, now_epoch_ms};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use tokio::sync::watch;

/// 状态字节中的取消位；低位为 `CommandState::to_u8`。
const CANCELLED_BIT: u8 = 0x80;

/// 推送给等待方的信号。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signal {
    state: CommandState,
    cancelled: bool,
}

/// 命令状态快照（含取消标记）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSnapshot {
    pub record: CommandRecord,
    pub cancelled: bool,
}

impl From<CommandRecord> for CommandSnapshot {
    fn from(record: CommandRecord) -> Self {
        let cancelled = record.cancelled;
        Self { record, cancelled }
    }
}

/// 在途命令。
pub(crate) struct PendingCommand {
    record: CommandRecord,
    state: AtomicU8,
    resolved_at_ms: AtomicI64,
    signal: watch::Sender<Signal>,
}

impl PendingCommand {
    pub(crate) fn new(record: CommandRecord) -> Self {
        let (signal, _) = watch::channel(Signal {
            state: CommandState::Pending,
            cancelled: false,
        });
        Self {
            state: AtomicU8::new(CommandState::Pending.to_u8()),
            resolved_at_ms: AtomicI64::new(0),
            record,
            signal,
        }
    }

    pub(crate) fn command_id(&self) -> &str {
        &self.record.command_id
    }

    pub(crate) fn device_address(&self) -> &str {
        &self.record.device_address
    }

    pub(crate) fn record(&self) -> &CommandRecord {
        &self.record
    }

    pub(crate) fn state(&self) -> CommandState {
        CommandState::from_u8(self.state.load(Ordering::Acquire) & !CANCELLED_BIT)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) & CANCELLED_BIT != 0
    }

    /// 尝试进入终态，只有第一个调用者返回 `true`。取消位保持不变。
    pub(crate) fn try_resolve(&self, target: CommandState) -> bool {
        if !target.is_terminal() {
            return false;
        }
        let won = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if CommandState::from_u8(current & !CANCELLED_BIT).is_terminal() {
                    None
                } else {
                    Some((current & CANCELLED_BIT) | target.to_u8())
                }
            })
            .is_ok();
        if won {
            self.resolved_at_ms.store(now_epoch_ms(), Ordering::Release);
            self.signal.send_modify(|signal| signal.state = target);
        }
        won
    }

    /// 标记取消；命令已进入终态时返回 `false`。
    pub(crate) fn cancel(&self) -> bool {
        let won = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if CommandState::from_u8(current & !CANCELLED_BIT).is_terminal() {
                    None
                } else {
                    Some(current | CANCELLED_BIT)
                }
            })
            .is_ok();
        if won {
            self.signal.send_modify(|signal| signal.cancelled = true);
        }
        won
    }

    pub(crate) fn resolved_at_ms(&self) -> Option<i64> {
        match self.resolved_at_ms.load(Ordering::Acquire) {
            0 => None,
            value => Some(value),
        }
    }

    /// 当前状态下的命令记录。
    pub(crate) fn snapshot(&self) -> CommandRecord {
        let bits = self.state.load(Ordering::Acquire);
        let state = CommandState::from_u8(bits & !CANCELLED_BIT);
        CommandRecord {
            state,
            cancelled: bits & CANCELLED_BIT != 0,
            resolved_at_ms: if state.is_terminal() {
                self.resolved_at_ms()
            } else {
                None
            },
            ..self.record.clone()
        }
    }

    pub(crate) fn view(&self) -> CommandSnapshot {
        CommandSnapshot::from(self.snapshot())
    }

    fn subscribe(&self) -> watch::Receiver<Signal> {
        self.signal.subscribe()
    }
}

/// 命令句柄：可轮询当前状态，也可等待终态。
pub struct CommandHandle {
    pending: Arc<PendingCommand>,
    receiver: watch::Receiver<Signal>,
}

impl CommandHandle {
    pub(crate) fn new(pending: Arc<PendingCommand>) -> Self {
        let receiver = pending.subscribe();
        Self { pending, receiver }
    }

    pub fn command_id(&self) -> &str {
        self.pending.command_id()
    }

    pub fn state(&self) -> CommandState {
        self.pending.state()
    }

    pub fn record(&self) -> CommandRecord {
        self.pending.snapshot()
    }

    pub fn is_cancelled(&self) -> bool {
        self.pending.is_cancelled()
    }

    /// 等待命令进入终态（或被取消）。
    ///
    /// 确认返回记录；拒绝、超时、取消以错误形式返回。
    pub async fn wait(mut self) -> Result<CommandRecord, ControlError> {
        loop {
            let signal = *self.receiver.borrow_and_update();
            if signal.cancelled {
                return Err(ControlError::Cancelled(self.command_id().to_string()));
            }
            match signal.state {
                CommandState::Acknowledged => return Ok(self.pending.snapshot()),
                CommandState::Rejected => {
                    return Err(ControlError::CommandRejected(self.command_id().to_string()));
                }
                CommandState::TimedOut => {
                    return Err(ControlError::CommandTimedOut(self.command_id().to_string()));
                }
                CommandState::Pending => {}
            }
            if self.receiver.changed().await.is_err() {
                return Err(ControlError::Dispatch(format!(
                    "command {} tracking closed",
                    self.command_id()
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::CommandPayload;

    fn pending() -> Arc<PendingCommand> {
        Arc::new(PendingCommand::new(CommandRecord {
            command_id: "c-1".to_string(),
            device_address: "AA".to_string(),
            payload: CommandPayload::OpenDoor,
            state: CommandState::Pending,
            issued_by: "admin".to_string(),
            issued_at_ms: 1,
            deadline_ms: 2,
            resolved_at_ms: None,
            cancelled: false,
        }))
    }

    #[test]
    fn first_terminal_transition_wins() {
        let command = pending();
        assert!(command.try_resolve(CommandState::TimedOut));
        assert!(!command.try_resolve(CommandState::Acknowledged));
        assert!(!command.try_resolve(CommandState::TimedOut));
        assert_eq!(command.state(), CommandState::TimedOut);
        assert!(command.snapshot().resolved_at_ms.is_some());
    }

    #[test]
    fn pending_is_not_a_valid_target() {
        let command = pending();
        assert!(!command.try_resolve(CommandState::Pending));
        assert_eq!(command.snapshot().resolved_at_ms, None);
    }

    #[test]
    fn racing_ack_and_timeout_resolve_exactly_once() {
        for _ in 0..200 {
            let command = pending();
            let ack = {
                let command = command.clone();
                std::thread::spawn(move || command.try_resolve(CommandState::Acknowledged))
            };
            let timeout = {
                let command = command.clone();
                std::thread::spawn(move || command.try_resolve(CommandState::TimedOut))
            };
            let ack_won = ack.join().expect("ack thread");
            let timeout_won = timeout.join().expect("timeout thread");
            assert!(ack_won ^ timeout_won);
            let expected = if ack_won {
                CommandState::Acknowledged
            } else {
                CommandState::TimedOut
            };
            assert_eq!(command.state(), expected);
        }
    }

    #[test]
    fn racing_cancel_and_ack_never_flag_a_resolved_command() {
        for _ in 0..200 {
            let command = pending();
            let cancel = {
                let command = command.clone();
                std::thread::spawn(move || command.cancel())
            };
            let ack = {
                let command = command.clone();
                std::thread::spawn(move || command.try_resolve(CommandState::Acknowledged))
            };
            let cancel_won = cancel.join().expect("cancel thread");
            assert!(ack.join().expect("ack thread"));
            assert_eq!(command.state(), CommandState::Acknowledged);
            // 取消失败时命令不得带取消标记
            assert_eq!(command.is_cancelled(), cancel_won);
            let record = command.snapshot();
            assert_eq!(record.cancelled, cancel_won);
            assert_eq!(record.state, CommandState::Acknowledged);
        }
    }

    #[test]
    fn cancelled_flag_survives_resolution() {
        let command = pending();
        assert!(command.cancel());
        assert!(command.try_resolve(CommandState::TimedOut));
        let view = command.view();
        assert!(view.cancelled);
        assert!(view.record.cancelled);
        assert_eq!(view.record.state, CommandState::TimedOut);
    }

    #[tokio::test]
    async fn wait_reports_cancellation() {
        let command = pending();
        let handle = CommandHandle::new(command.clone());
        assert!(command.cancel());
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, ControlError::Cancelled(_)));
        // 取消不影响内部终态转换
        assert!(command.try_resolve(CommandState::Acknowledged));
        assert!(!command.cancel());
    }

    #[tokio::test]
    async fn wait_returns_record_on_ack() {
        let command = pending();
        let handle = CommandHandle::new(command.clone());
        let waiter = tokio::spawn(handle.wait());
        tokio::task::yield_now().await;
        assert!(command.try_resolve(CommandState::Acknowledged));
        let record = waiter.await.expect("join").expect("acknowledged");
        assert_eq!(record.state, CommandState::Acknowledged);
    }
}
