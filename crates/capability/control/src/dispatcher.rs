//! 命令下发器。

use crate::error::ControlError;
use crate::pending::{CommandHandle, CommandSnapshot, PendingCommand};
use crate::validation::validate_intent;
use dashmap::DashMap;
use domain::{CommandRecord, CommandState, Intent, now_epoch_ms};
use domophone_bus::MessageBus;
use domophone_protocol::{TopicLayout, encode_command};
use domophone_registry::DeviceRegistry;
use domophone_storage::CommandStore;
use domophone_telemetry::{
    record_command_acknowledged, record_command_dispatch_failure,
    record_command_dispatch_success, record_command_issue_latency_ms, record_command_issued,
    record_command_rejected, record_command_timed_out,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 下发器配置。
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 等待设备确认的时限。到期仍为 `pending` 则流转为 `timed_out`。
    pub command_timeout: Duration,
    /// 总线发布失败时的重试次数（命令本身不会自动重发）。
    pub dispatch_max_retries: u64,
    pub dispatch_backoff_ms: u64,
    /// 已进入终态的命令在内存中保留的时长。
    pub retention: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            dispatch_max_retries: 0,
            dispatch_backoff_ms: 0,
            retention: Duration::from_secs(600),
        }
    }
}

/// 回执匹配结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResolution {
    /// 回执赢得终态转换，命令已确认；调用方应用对应的状态变更。
    Acknowledged(CommandRecord),
    /// 设备报告执行失败，命令终态为 `rejected`，不做状态变更。
    Rejected(CommandRecord),
    /// 命令已处于终态（重复回执或超时后迟到），空操作。
    AlreadyResolved(CommandState),
    /// 不认识的命令 id（例如重启前下发的命令）。
    Unknown,
    /// 回执来自非目标设备。
    DeviceMismatch { expected: String },
}

/// 命令下发器：校验意图、发布报文、跟踪确认。
pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
    bus: Arc<dyn MessageBus>,
    commands: Arc<dyn CommandStore>,
    layout: TopicLayout,
    pending: DashMap<String, Arc<PendingCommand>>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        bus: Arc<dyn MessageBus>,
        commands: Arc<dyn CommandStore>,
        layout: TopicLayout,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            bus,
            commands,
            layout,
            pending: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 提交一条管理意图。
    ///
    /// 校验失败同步返回错误且不发布任何报文。发布成功后命令登记为 `pending`，
    /// 并启动超时计时器。
    pub async fn submit(&self, intent: Intent) -> Result<CommandHandle, ControlError> {
        record_command_issued();
        let started_at = Instant::now();
        let device = self
            .registry
            .get(&intent.device_address)
            .ok_or_else(|| ControlError::DeviceUnknown(intent.device_address.clone()))?;
        let payload = validate_intent(&device, &intent)?;

        let issued_at_ms = now_epoch_ms();
        let record = CommandRecord {
            command_id: uuid::Uuid::new_v4().to_string(),
            device_address: device.address.clone(),
            payload,
            state: CommandState::Pending,
            issued_by: intent.issued_by.clone(),
            issued_at_ms,
            deadline_ms: issued_at_ms + self.config.command_timeout.as_millis() as i64,
            resolved_at_ms: None,
            cancelled: false,
        };
        let bytes = encode_command(&record)
            .map_err(|err| ControlError::Validation(err.to_string()))?;
        let topic = self.layout.command_topic(&record.device_address);
        info!(
            target: "domophone.control",
            command_id = %record.command_id,
            device_address = %record.device_address,
            command_kind = record.kind().as_str(),
            actor = %record.issued_by,
            "command_issue_requested"
        );

        // 先登记再发布：设备的回执可能早于 publish 返回。
        let pending = Arc::new(PendingCommand::new(record.clone()));
        self.pending
            .insert(record.command_id.clone(), pending.clone());

        if let Err(err) = dispatch_with_retry(
            self.bus.as_ref(),
            &topic,
            bytes,
            self.config.dispatch_max_retries,
            self.config.dispatch_backoff_ms,
        )
        .await
        {
            self.pending.remove(&record.command_id);
            record_command_dispatch_failure();
            warn!(
                target: "domophone.control",
                command_id = %record.command_id,
                device_address = %record.device_address,
                topic = %topic,
                error = %err,
                "command_dispatch_failed"
            );
            return Err(err);
        }
        record_command_dispatch_success();

        if let Err(err) = self.commands.save_command(&record).await {
            warn!(
                target: "domophone.control",
                command_id = %record.command_id,
                error = %err,
                "command_persist_failed"
            );
        }
        spawn_command_timeout_task(
            pending.clone(),
            self.commands.clone(),
            self.config.command_timeout,
        );
        record_command_issue_latency_ms(started_at.elapsed().as_millis() as u64);
        info!(
            target: "domophone.control",
            command_id = %record.command_id,
            device_address = %record.device_address,
            topic = %topic,
            deadline_ms = record.deadline_ms,
            "command_dispatched"
        );
        Ok(CommandHandle::new(pending))
    }

    /// 按命令 id 匹配设备回执，幂等。
    pub async fn resolve_ack(
        &self,
        command_id: &str,
        device_address: &str,
        ok: bool,
    ) -> AckResolution {
        let Some(pending) = self.pending.get(command_id).map(|entry| entry.value().clone()) else {
            return AckResolution::Unknown;
        };
        if pending.device_address() != device_address {
            return AckResolution::DeviceMismatch {
                expected: pending.device_address().to_string(),
            };
        }
        let target = if ok {
            CommandState::Acknowledged
        } else {
            CommandState::Rejected
        };
        if !pending.try_resolve(target) {
            return AckResolution::AlreadyResolved(pending.state());
        }
        let record = pending.snapshot();
        if ok {
            record_command_acknowledged();
        } else {
            record_command_rejected();
        }
        info!(
            target: "domophone.control",
            command_id = %command_id,
            device_address = %device_address,
            state = record.state.as_str(),
            cancelled = pending.is_cancelled(),
            "command_resolved"
        );
        if let Err(err) = self.commands.save_command(&record).await {
            warn!(
                target: "domophone.control",
                command_id = %command_id,
                error = %err,
                "command_persist_failed"
            );
        }
        if ok {
            AckResolution::Acknowledged(record)
        } else {
            AckResolution::Rejected(record)
        }
    }

    /// 取消在途命令：只压制调用方通知，不撤回已发布的报文。取消标记随命令记录落盘。
    pub async fn cancel(&self, command_id: &str) -> Result<CommandSnapshot, ControlError> {
        let pending = self
            .pending
            .get(command_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ControlError::CommandNotFound(command_id.to_string()))?;
        if !pending.cancel() {
            return Err(ControlError::Validation(format!(
                "command {} already {}",
                command_id,
                pending.state().as_str()
            )));
        }
        info!(
            target: "domophone.control",
            command_id = %command_id,
            device_address = %pending.device_address(),
            "command_cancelled"
        );
        let view = pending.view();
        if let Err(err) = self.commands.save_command(&view.record).await {
            warn!(
                target: "domophone.control",
                command_id = %command_id,
                error = %err,
                "command_persist_failed"
            );
        }
        Ok(view)
    }

    /// 命令当前状态：优先内存中的在途表，其次命令历史。
    pub async fn status(&self, command_id: &str) -> Result<CommandSnapshot, ControlError> {
        if let Some(pending) = self.pending.get(command_id).map(|entry| entry.value().clone()) {
            return Ok(pending.view());
        }
        match self.commands.find_command(command_id).await? {
            Some(record) => Ok(CommandSnapshot::from(record)),
            None => Err(ControlError::CommandNotFound(command_id.to_string())),
        }
    }

    /// 把命令历史中截止时间不晚于 `deadline_before_ms` 的 `pending` 记录置为 `timed_out`。
    ///
    /// 这些记录没有在途条目跟踪（例如进程重启前下发的命令），回执到达时也无法匹配。
    pub async fn expire_stale_commands(
        &self,
        deadline_before_ms: i64,
    ) -> Result<usize, ControlError> {
        let expired = self
            .commands
            .expire_pending(deadline_before_ms, now_epoch_ms())
            .await?;
        if expired > 0 {
            for _ in 0..expired {
                record_command_timed_out();
            }
            info!(
                target: "domophone.control",
                expired = expired,
                deadline_before_ms = deadline_before_ms,
                "stale_commands_expired"
            );
        }
        Ok(expired)
    }

    /// 在途表中处于 `pending` 的命令数量。
    pub fn in_flight(&self) -> usize {
        self.pending
            .iter()
            .filter(|entry| entry.value().state() == CommandState::Pending)
            .count()
    }

    /// 清理终态超过保留期的命令，返回清理数量。
    pub fn prune_resolved(&self, now_ms: i64) -> usize {
        let retention_ms = self.config.retention.as_millis() as i64;
        let before = self.pending.len();
        self.pending.retain(|_, pending| match pending.resolved_at_ms() {
            Some(resolved_at) if pending.state().is_terminal() => {
                now_ms - resolved_at < retention_ms
            }
            _ => true,
        });
        before.saturating_sub(self.pending.len())
    }
}

/// 周期清理已终结的在途命令，并终结命令历史中无人跟踪的过期 `pending` 记录。
///
/// 历史记录的截止线再退后一个超时周期，在途条目由各自的超时任务先行终结。
pub fn spawn_pending_sweeper(
    dispatcher: Arc<CommandDispatcher>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now_ms = now_epoch_ms();
            let pruned = dispatcher.prune_resolved(now_ms);
            if pruned > 0 {
                info!(target: "domophone.control", pruned = pruned, "pending_commands_pruned");
            }
            let timeout_ms = dispatcher.config.command_timeout.as_millis() as i64;
            if let Err(err) = dispatcher.expire_stale_commands(now_ms - timeout_ms).await {
                warn!(
                    target: "domophone.control",
                    error = %err,
                    "stale_command_sweep_failed"
                );
            }
        }
    })
}

fn spawn_command_timeout_task(
    pending: Arc<PendingCommand>,
    commands: Arc<dyn CommandStore>,
    timeout: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if !pending.try_resolve(CommandState::TimedOut) {
            return;
        }
        record_command_timed_out();
        info!(
            target: "domophone.control",
            command_id = %pending.command_id(),
            device_address = %pending.device_address(),
            command_kind = pending.record().kind().as_str(),
            timeout_ms = timeout.as_millis() as u64,
            "command_timed_out"
        );
        if let Err(err) = commands.save_command(&pending.snapshot()).await {
            warn!(
                target: "domophone.control",
                command_id = %pending.command_id(),
                error = %err,
                "command_persist_failed"
            );
        }
    });
}

async fn dispatch_with_retry(
    bus: &dyn MessageBus,
    topic: &str,
    payload: Vec<u8>,
    max_retries: u64,
    backoff_ms: u64,
) -> Result<(), ControlError> {
    let mut attempt = 0u64;
    loop {
        match bus.publish(topic, payload.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(ControlError::Dispatch(err.to_string()));
                }
                warn!(
                    target: "domophone.control",
                    topic = %topic,
                    attempt = attempt,
                    error = %err,
                    "command_dispatch_retry"
                );
                if backoff_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }
}
