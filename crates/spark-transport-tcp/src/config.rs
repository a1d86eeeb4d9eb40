use socket2::SockRef;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[cfg(unix)]
use std::path::{Path, PathBuf};

/// accept 请求的投递模型。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcceptBackendKind {
    /// 就绪模型：监听句柄可读时执行一次非阻塞 accept。
    #[default]
    Readiness,
    /// 完成模型：始终保持一个在途的异步 accept 请求，完成后立即补投。
    /// 仅在 Linux 且启用 `io-uring` 特性时可用。
    Completion,
}

/// 已接受连接的套接字选项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让服务端在交付连接之前就决定 `SO_LINGER` 与 `TCP_NODELAY`，回调拿到的连接无需再触碰
///   `socket2` 或平台常量；
///
/// ## 契约（What）
/// - `linger`：`Some(dur)` 时关闭阶段最多等待 `dur`，`None` 遵循内核默认；
/// - `nodelay`：是否关闭 Nagle 算法，默认关闭（即 `false`，保留内核默认行为）；
/// - 选项只作用于 TCP 连接，Unix 域连接忽略它们。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
    nodelay: bool,
}

impl TcpSocketConfig {
    pub const fn new() -> Self {
        Self {
            linger: None,
            nodelay: false,
        }
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub(crate) fn apply(&self, socket: SockRef<'_>) -> io::Result<()> {
        if self.linger.is_some() {
            socket.set_linger(self.linger)?;
        }
        if self.nodelay {
            socket.set_tcp_nodelay(true)?;
        }
        Ok(())
    }
}

/// TCP 监听配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `TcpServer::start(port, backlog, cb)` 覆盖最常见的“所有本地 IPv4 地址 + 指定端口”场景，
///   需要指定绑定地址、后端或套接字选项时改用本结构；
///
/// ## 契约（What）
/// - 默认绑定 `0.0.0.0`，开启 `SO_REUSEADDR`，使用就绪模型后端；
/// - 端口为 0 时由内核分配，实际端口通过 `TcpServer::local_addr` 读取。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpServerConfig {
    bind_address: IpAddr,
    port: u16,
    backlog: i32,
    backend: AcceptBackendKind,
    reuse_address: bool,
    socket: TcpSocketConfig,
}

impl TcpServerConfig {
    pub fn new(port: u16, backlog: i32) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            backlog,
            backend: AcceptBackendKind::default(),
            reuse_address: true,
            socket: TcpSocketConfig::default(),
        }
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn with_backend(mut self, backend: AcceptBackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    pub fn with_socket_config(mut self, socket: TcpSocketConfig) -> Self {
        self.socket = socket;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    pub fn backend(&self) -> AcceptBackendKind {
        self.backend
    }

    pub fn reuse_address(&self) -> bool {
        self.reuse_address
    }

    pub fn socket_config(&self) -> &TcpSocketConfig {
        &self.socket
    }
}

/// Unix 域监听配置。
///
/// `abstract_namespace` 为真时地址位于 Linux 抽象命名空间，不在文件系统中留下节点；
/// 否则服务器停止时会删除自己创建的套接字文件。
#[cfg(unix)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnixServerConfig {
    path: PathBuf,
    abstract_namespace: bool,
    backlog: i32,
}

#[cfg(unix)]
impl UnixServerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            abstract_namespace: false,
            backlog: 1,
        }
    }

    pub fn with_abstract_namespace(mut self, abstract_namespace: bool) -> Self {
        self.abstract_namespace = abstract_namespace;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn abstract_namespace(&self) -> bool {
        self.abstract_namespace
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }
}
