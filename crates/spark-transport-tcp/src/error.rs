use spark_reactor::ReactorError;
use std::io;
use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    code: &'static str,
    message: &'static str,
}

impl OperationKind {
    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &'static str {
        self.message
    }
}

pub(crate) const SOCKET: OperationKind = OperationKind {
    code: "spark.transport.tcp.socket_failed",
    message: "tcp socket",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.transport.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const LISTEN: OperationKind = OperationKind {
    code: "spark.transport.tcp.listen_failed",
    message: "tcp listen",
};
pub(crate) const POST: OperationKind = OperationKind {
    code: "spark.transport.tcp.post_failed",
    message: "tcp post accept",
};

const REPOST_CODE: &str = "spark.transport.tcp.repost_failed";
const ACCEPT_CODE: &str = "spark.transport.tcp.accept_failed";
const REGISTER_CODE: &str = "spark.transport.tcp.register_failed";
const ALREADY_STARTED_CODE: &str = "spark.transport.tcp.already_started";
const UNSUPPORTED_CODE: &str = "spark.transport.tcp.unsupported";

/// accept 引擎的错误。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - `start` 的失败以返回值报告，调用方可以换端口重试或放弃，服务器对象本身保持可用；
/// - 重新投递失败（[`AcceptError::RepostFailed`]）必须被单独识别：若被吞掉，服务器会在
///   没有任何信号的情况下停止接受连接。
///
/// ## 契约 (What)
/// - `Setup`：创建、配置、绑定、监听或首次投递失败，`kind` 指明具体步骤；
/// - `RepostFailed`：完成后同步投递下一个请求失败，引擎进入 `Stalled`；
/// - `Accept`：单次 accept 失败（非“暂无连接”），记录日志后引擎继续服务；
/// - `Register`：向反应器登记监听句柄失败；
/// - 每个错误都可通过 `code()` 取得 `spark.transport.tcp.*` 稳定错误码。
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("{}: {}", .kind.message, .source)]
    Setup {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },
    #[error("tcp repost accept: {source}")]
    RepostFailed {
        #[source]
        source: io::Error,
    },
    #[error("tcp accept: {source}")]
    Accept {
        #[source]
        source: io::Error,
    },
    #[error("tcp register: {0}")]
    Register(#[from] ReactorError),
    #[error("tcp server already started")]
    AlreadyStarted,
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl AcceptError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Setup { kind, .. } => kind.code,
            Self::RepostFailed { .. } => REPOST_CODE,
            Self::Accept { .. } => ACCEPT_CODE,
            Self::Register(_) => REGISTER_CODE,
            Self::AlreadyStarted => ALREADY_STARTED_CODE,
            Self::Unsupported(_) => UNSUPPORTED_CODE,
        }
    }

    pub(crate) fn setup(kind: OperationKind, source: io::Error) -> Self {
        Self::Setup { kind, source }
    }
}

/// 为 `Result` 附加步骤信息。
pub(crate) trait SetupContext<T> {
    fn during(self, kind: OperationKind) -> Result<T, AcceptError>;
}

impl<T> SetupContext<T> for io::Result<T> {
    fn during(self, kind: OperationKind) -> Result<T, AcceptError> {
        self.map_err(|source| AcceptError::setup(kind, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_error_carries_step_code_and_message() {
        let err = AcceptError::setup(BIND, io::Error::from(io::ErrorKind::AddrInUse));
        assert_eq!(err.code(), "spark.transport.tcp.bind_failed");
        assert!(err.to_string().starts_with("tcp bind: "));
    }

    #[test]
    fn repost_failure_has_its_own_code() {
        let err = AcceptError::RepostFailed {
            source: io::Error::other("queue full"),
        };
        assert_eq!(err.code(), "spark.transport.tcp.repost_failed");
    }
}
