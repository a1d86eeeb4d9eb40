use crate::config::TcpSocketConfig;
use socket2::{SockRef, Socket};
use spark_reactor::RawHandle;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// 一条已接受的入站连接。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - accept 完成时句柄的所有权唯一地移交给回调：服务器不保留任何副本，连接的生命周期
///   完全属于接收者；
///
/// ## 契约 (What)
/// - 交付时已处于非阻塞模式，读写遇到 `WouldBlock` 说明需要等待下一次就绪；
/// - 实现 [`Read`]/[`Write`]，也可以通过 [`ClientConnection::into_tcp_stream`] 取回标准库类型；
/// - 被丢弃即关闭句柄。
///
/// ## 注意事项 (Trade-offs)
/// - 连接不登记到任何反应器，调用方需要时自行用 [`ClientConnection::raw_handle`] 登记。
pub struct ClientConnection {
    stream: Stream,
}

impl ClientConnection {
    pub(crate) fn from_tcp_socket(socket: Socket, options: &TcpSocketConfig) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        options.apply(SockRef::from(&socket))?;
        Ok(Self {
            stream: Stream::Tcp(socket.into()),
        })
    }

    #[cfg(unix)]
    pub(crate) fn from_unix_socket(socket: Socket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            stream: Stream::Unix(socket.into()),
        })
    }

    /// TCP 对端地址；Unix 域连接返回 `None`。
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.stream {
            Stream::Tcp(stream) => stream.peer_addr().ok(),
            #[cfg(unix)]
            Stream::Unix(_) => None,
        }
    }

    /// 是否为 Unix 域连接。
    pub fn is_unix(&self) -> bool {
        !matches!(self.stream, Stream::Tcp(_))
    }

    /// 底层句柄，用于向反应器登记。
    pub fn raw_handle(&self) -> RawHandle {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            match &self.stream {
                Stream::Tcp(stream) => stream.as_raw_fd(),
                Stream::Unix(stream) => stream.as_raw_fd(),
            }
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            match &self.stream {
                Stream::Tcp(stream) => stream.as_raw_socket(),
            }
        }
    }

    /// 关闭读、写或双向。
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        match &self.stream {
            Stream::Tcp(stream) => stream.shutdown(how),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.shutdown(how),
        }
    }

    /// 取回 TCP 流；Unix 域连接原样返回。
    pub fn into_tcp_stream(self) -> Result<TcpStream, Self> {
        match self.stream {
            Stream::Tcp(stream) => Ok(stream),
            #[cfg(unix)]
            other => Err(Self { stream: other }),
        }
    }

    /// 取回 Unix 域流；TCP 连接原样返回。
    #[cfg(unix)]
    pub fn into_unix_stream(self) -> Result<UnixStream, Self> {
        match self.stream {
            Stream::Unix(stream) => Ok(stream),
            other => Err(Self { stream: other }),
        }
    }
}

impl From<TcpStream> for ClientConnection {
    fn from(stream: TcpStream) -> Self {
        Self {
            stream: Stream::Tcp(stream),
        }
    }
}

#[cfg(unix)]
impl From<UnixStream> for ClientConnection {
    fn from(stream: UnixStream) -> Self {
        Self {
            stream: Stream::Unix(stream),
        }
    }
}

impl Read for ClientConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ClientConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            Stream::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.flush(),
        }
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ClientConnection");
        match &self.stream {
            Stream::Tcp(stream) => out.field("tcp", stream),
            #[cfg(unix)]
            Stream::Unix(stream) => out.field("unix", stream),
        };
        out.finish()
    }
}
