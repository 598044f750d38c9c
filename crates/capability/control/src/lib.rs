//! # 命令下发与确认跟踪
//!
//! ```text
//! Intent ──▶ validate ──▶ register pending ──▶ publish commands/{addr}
//!                                               │
//!             ┌─────────────── ack (command_id) ◀┘      timeout timer
//!             ▼                                           │
//!        CAS Pending → Acknowledged / Rejected   ◀── CAS Pending → TimedOut
//! ```
//!
//! - 校验失败（设备未知、设备停用、载荷非法）同步返回，不发布报文。
//! - 超时是软失败：设备之后仍可能执行命令；不自动重发，重发即管理员重新提交。
//! - 取消只压制调用方通知，命令的内部终态与回执效果不受影响。

mod admin;
mod dispatcher;
mod error;
mod pending;
mod validation;

pub use admin::AdminService;
pub use dispatcher::{AckResolution, CommandDispatcher, DispatcherConfig, spawn_pending_sweeper};
pub use error::ControlError;
pub use pending::{CommandHandle, CommandSnapshot};
