//! netlink 监视器的错误类型。
//!
//! # 教案定位（Why）
//! - 构造期的资源创建失败（打开、设置选项、绑定）不可恢复，直接让 [`NetlinkMonitor::new`]
//!   返回 [`NetlinkError::Setup`]，监视器对象根本不会出现；
//! - 单份电报内的问题（内核报错、记录畸形）只影响这一次解码，用 [`DecodeError`] 描述后记录日志，
//!   监视器继续服务后续电报。
//!
//! # 使用契约（What）
//! - 每个错误都能通过 `code()` 给出 `spark.netlink.*` 命名空间下的稳定错误码；
//! - [`DecodeError`] 实现 `Clone`/`PartialEq`，测试可直接断言具体分支。
//!
//! [`NetlinkMonitor::new`]: crate::NetlinkMonitor

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
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 默认文案。
    pub fn message(&self) -> &'static str {
        self.message
    }
}

pub(crate) const OPEN: OperationKind = OperationKind {
    code: "spark.netlink.open_failed",
    message: "could not open netlink socket",
};
pub(crate) const REUSE_ADDRESS: OperationKind = OperationKind {
    code: "spark.netlink.configure_failed",
    message: "could not set SO_REUSEADDR",
};
pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.netlink.bind_failed",
    message: "could not bind netlink socket",
};

const RECEIVE_CODE: &str = "spark.netlink.receive_failed";
const REGISTER_CODE: &str = "spark.netlink.register_failed";
const STOPPED_CODE: &str = "spark.netlink.stopped";

/// 监视器生命周期中的错误。
#[derive(Debug, Error)]
pub enum NetlinkError {
    /// 构造期的套接字创建、选项或绑定失败。
    #[error("{}: {}", .kind.message, .source)]
    Setup {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },
    /// 接收数据报失败（非“暂无数据”）。
    #[error("netlink receive: {0}")]
    Receive(#[source] io::Error),
    /// 向反应器登记失败。
    #[error("netlink register: {0}")]
    Register(#[from] ReactorError),
    /// 监视器已经 `stop()`，套接字已关闭。
    #[error("netlink monitor already stopped")]
    Stopped,
}

impl NetlinkError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Setup { kind, .. } => kind.code,
            Self::Receive(_) => RECEIVE_CODE,
            Self::Register(_) => REGISTER_CODE,
            Self::Stopped => STOPPED_CODE,
        }
    }

    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    pub(crate) fn setup(kind: OperationKind, source: impl Into<io::Error>) -> Self {
        Self::Setup {
            kind,
            source: source.into(),
        }
    }
}

/// 单份电报解码过程中的错误；触发后放弃该电报的剩余记录。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 记录的固定载荷短于协议要求。
    #[error("record type {record_type} carries {actual} payload bytes, {required} required")]
    PayloadTooShort {
        record_type: u16,
        required: usize,
        actual: usize,
    },
    /// 属性值短于其类型要求（例如 IPv4 本地地址不足 4 字节）。
    #[error("attribute type {attribute_type} carries {actual} bytes, {required} required")]
    AttributeTooShort {
        attribute_type: u16,
        required: usize,
        actual: usize,
    },
    /// 内核在电报中返回了错误记录。
    #[error("kernel reported netlink error {errno}")]
    KernelError { errno: i32 },
}

impl DecodeError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadTooShort { .. } | Self::AttributeTooShort { .. } => {
                "spark.netlink.malformed_record"
            }
            Self::KernelError { .. } => "spark.netlink.kernel_error",
        }
    }
}
