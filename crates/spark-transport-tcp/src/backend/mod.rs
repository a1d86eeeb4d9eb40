//! accept 后端的统一契约。
//!
//! # 教案定位（Why）
//! - 就绪模型与完成模型对“何时可以取到一条连接”的回答不同：前者在监听句柄可读时主动 accept，
//!   后者由内核完成一个预先投递的请求。两者都必须满足“启动后、停止前始终有一个 accept 请求在途”。
//! - 服务器只面对 [`AcceptStrategy`]，不关心背后是哪种模型；两个后端各自维护自己的 [`AcceptState`]。
//!
//! # 契约说明（What）
//! - [`AcceptStrategy::arm`]：投递第一个请求，或在 `Stalled` 后再次尝试；
//! - [`AcceptStrategy::harvest`]：消费一次就绪/完成信号，产出至多一条连接与至多一个需要上报的故障；
//! - [`AcceptStrategy::shutdown`]：停止后端，之后到达的信号只做清理，不再产出连接。

mod completion;
mod readiness;
#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub(crate) mod uring;

pub use completion::{AcceptSubmitter, CompletionAcceptor};
pub use readiness::ReadinessAcceptor;

use crate::connection::ClientConnection;
use crate::error::AcceptError;
use std::fmt;
use std::io;

/// 监听槽位的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptState {
    /// 尚未投递请求。
    Idle,
    /// 恰有一个请求在途；就绪模型下表示监听队列处于可接受状态。
    AcceptPosted,
    /// 补投失败，不再有请求在途，需要 [`AcceptStrategy::arm`] 干预。
    Stalled,
    /// 已停止。
    Stopped,
}

impl AcceptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AcceptPosted => "accept_posted",
            Self::Stalled => "stalled",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AcceptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 反应器交给后端的信号。
#[derive(Debug)]
pub enum AcceptSignal {
    /// 监听句柄可读。
    Ready,
    /// 在途请求完成，携带已接受的连接或失败原因。
    Completed(io::Result<ClientConnection>),
}

/// 一次信号的处理结果。
#[derive(Debug, Default)]
pub struct Harvest {
    /// 交给应用回调的连接。
    pub connection: Option<ClientConnection>,
    /// 需要上报给故障观察者的错误（目前只有补投失败）。
    pub fault: Option<AcceptError>,
}

impl Harvest {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.connection.is_none() && self.fault.is_none()
    }
}

/// accept 后端。
pub trait AcceptStrategy {
    /// 投递请求。`Idle`/`Stalled` 时投递，`AcceptPosted` 时为无操作，`Stopped` 时失败。
    fn arm(&mut self) -> Result<(), AcceptError>;

    /// 处理一次信号。
    fn harvest(&mut self, signal: AcceptSignal) -> Harvest;

    /// 停止后端并释放监听资源。
    fn shutdown(&mut self);

    fn state(&self) -> AcceptState;
}

/// `Stopped` 后再次 arm 的错误。
pub(crate) fn stopped_error() -> AcceptError {
    AcceptError::RepostFailed {
        source: io::Error::new(io::ErrorKind::NotConnected, "accept engine stopped"),
    }
}
