use std::io;
use thiserror::Error;

/// 描述一次反应器操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const CREATE: OperationKind = OperationKind {
    code: "spark.reactor.create_failed",
    message: "reactor create",
};
pub(crate) const REGISTER: OperationKind = OperationKind {
    code: "spark.reactor.register_failed",
    message: "reactor register",
};
pub(crate) const DEREGISTER: OperationKind = OperationKind {
    code: "spark.reactor.deregister_failed",
    message: "reactor deregister",
};
pub(crate) const WAIT: OperationKind = OperationKind {
    code: "spark.reactor.wait_failed",
    message: "reactor wait",
};
pub(crate) const WAKE: OperationKind = OperationKind {
    code: "spark.reactor.wake_failed",
    message: "reactor wake",
};
#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub(crate) const COMPLETION: OperationKind = OperationKind {
    code: "spark.reactor.completion_port_failed",
    message: "reactor completion port",
};

/// 反应器操作失败。
///
/// # 教案式注释
///
/// - **意图 (Why)**：反应器只会因操作系统多路复用原语失败而出错，统一用一个结构携带
///   稳定错误码与原始 [`io::Error`]，调用方既能按码分类告警，也能读取 errno。
/// - **契约 (What)**：[`ReactorError::code`] 返回 `spark.reactor.*` 命名空间下的稳定标识；
///   `source()` 链指向底层 IO 错误。
#[derive(Debug, Error)]
#[error("{}: {}", .kind.message, .source)]
pub struct ReactorError {
    kind: OperationKind,
    #[source]
    source: io::Error,
}

impl ReactorError {
    pub(crate) fn new(kind: OperationKind, source: io::Error) -> Self {
        Self { kind, source }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.kind.code
    }

    /// 底层 IO 错误。
    pub fn io_error(&self) -> &io::Error {
        &self.source
    }
}
