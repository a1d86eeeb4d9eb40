//! 监听套接字的分步创建。
//!
//! # 教案定位（Why）
//! - `start` 的每一步（创建、地址复用、绑定、非阻塞、监听）都可能失败，失败原因要能定位到具体步骤，
//!   因此直接用 `socket2` 逐步执行，而不是标准库一步到位的 `TcpListener::bind`；
//! - TCP 与 Unix 域监听共享同一套 accept 路径，只在地址与连接包装上不同。

use crate::config::{TcpServerConfig, TcpSocketConfig};
use crate::connection::ClientConnection;
use crate::error::{self, AcceptError, SetupContext};
use socket2::{Domain, Protocol, Socket, Type};
use spark_reactor::RawHandle;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use tracing::debug;

#[cfg(unix)]
use crate::config::UnixServerConfig;
#[cfg(unix)]
use std::path::PathBuf;

/// 服务器实际监听的地址。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenAddress {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix {
        path: PathBuf,
        abstract_namespace: bool,
    },
}

impl ListenAddress {
    /// TCP 监听地址；Unix 域监听返回 `None`。
    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(addr) => Some(*addr),
            #[cfg(unix)]
            Self::Unix { .. } => None,
        }
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            Self::Unix {
                path,
                abstract_namespace: true,
            } => write!(f, "@{}", path.display()),
            #[cfg(unix)]
            Self::Unix { path, .. } => write!(f, "{}", path.display()),
        }
    }
}

/// 处于监听状态、非阻塞的套接字。
pub(crate) struct Listener {
    socket: Socket,
    address: ListenAddress,
    options: TcpSocketConfig,
}

impl Listener {
    pub(crate) fn bind_tcp(config: &TcpServerConfig) -> Result<Self, AcceptError> {
        let requested = config.socket_addr();
        let socket = Socket::new(
            Domain::for_address(requested),
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .during(error::SOCKET)?;
        if config.reuse_address() {
            socket.set_reuse_address(true).during(error::CONFIGURE)?;
        }
        socket.bind(&requested.into()).during(error::BIND)?;
        socket.set_nonblocking(true).during(error::CONFIGURE)?;
        socket.listen(config.backlog()).during(error::LISTEN)?;

        let local = socket
            .local_addr()
            .during(error::BIND)?
            .as_socket()
            .unwrap_or(requested);
        debug!(address = %local, backlog = config.backlog(), "tcp listener ready");
        Ok(Self {
            socket,
            address: ListenAddress::Tcp(local),
            options: config.socket_config().clone(),
        })
    }

    #[cfg(unix)]
    pub(crate) fn bind_unix(config: &UnixServerConfig) -> Result<Self, AcceptError> {
        let address = unix_address(config)?;
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).during(error::SOCKET)?;
        socket.bind(&address).during(error::BIND)?;
        socket.set_nonblocking(true).during(error::CONFIGURE)?;
        socket.listen(config.backlog()).during(error::LISTEN)?;

        debug!(
            path = %config.path().display(),
            abstract_namespace = config.abstract_namespace(),
            backlog = config.backlog(),
            "unix listener ready"
        );
        Ok(Self {
            socket,
            address: ListenAddress::Unix {
                path: config.path().to_path_buf(),
                abstract_namespace: config.abstract_namespace(),
            },
            options: TcpSocketConfig::default(),
        })
    }

    /// 执行一次非阻塞 accept。
    pub(crate) fn accept(&self) -> io::Result<ClientConnection> {
        let (socket, _) = self.socket.accept()?;
        match &self.address {
            ListenAddress::Tcp(_) => ClientConnection::from_tcp_socket(socket, &self.options),
            #[cfg(unix)]
            ListenAddress::Unix { .. } => ClientConnection::from_unix_socket(socket),
        }
    }

    pub(crate) fn address(&self) -> &ListenAddress {
        &self.address
    }

    #[cfg_attr(not(all(target_os = "linux", feature = "io-uring")), allow(dead_code))]
    pub(crate) fn options(&self) -> &TcpSocketConfig {
        &self.options
    }

    pub(crate) fn raw_handle(&self) -> RawHandle {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            self.socket.as_raw_fd()
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            self.socket.as_raw_socket()
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let ListenAddress::Unix {
            path,
            abstract_namespace: false,
        } = &self.address
            && let Err(err) = std::fs::remove_file(path)
        {
            debug!(path = %path.display(), error = %err, "unix socket file not removed");
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn unix_address(config: &UnixServerConfig) -> Result<socket2::SockAddr, AcceptError> {
    if !config.abstract_namespace() {
        return socket2::SockAddr::unix(config.path()).during(error::BIND);
    }
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        // 抽象命名空间地址以 NUL 字节开头
        let mut name = vec![0u8];
        name.extend_from_slice(config.path().as_os_str().as_bytes());
        socket2::SockAddr::unix(OsStr::from_bytes(&name)).during(error::BIND)
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        Err(AcceptError::Unsupported("abstract unix socket namespace"))
    }
}
