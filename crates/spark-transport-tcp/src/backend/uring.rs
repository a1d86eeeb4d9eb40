//! 基于 io_uring 的 accept 投递者。

#![allow(unsafe_code)]

use super::AcceptSubmitter;
use crate::config::TcpSocketConfig;
use crate::connection::ClientConnection;
use crate::listener::Listener;
use io_uring::{opcode, types};
use socket2::Socket;
use spark_reactor::{CompletionPort, CompletionToken};
use std::io;
use std::os::fd::FromRawFd;
use std::ptr;

/// 经反应器完成端口投递 `IORING_OP_ACCEPT`。
///
/// 请求不携带对端地址缓冲，因此提交项不引用任何用户内存；对端地址在需要时由
/// [`ClientConnection::peer_addr`] 查询。
pub(crate) struct UringSubmitter {
    port: CompletionPort,
    token: Option<CompletionToken>,
    listener: Option<Listener>,
}

impl UringSubmitter {
    pub(crate) fn new(port: CompletionPort, listener: Listener) -> Self {
        Self {
            port,
            token: None,
            listener: Some(listener),
        }
    }

    /// 绑定完成处理器的令牌；投递前必须调用。
    pub(crate) fn bind_token(&mut self, token: CompletionToken) {
        self.token = Some(token);
    }
}

impl AcceptSubmitter for UringSubmitter {
    fn submit(&mut self) -> io::Result<()> {
        let (Some(listener), Some(token)) = (self.listener.as_ref(), self.token.as_ref()) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "accept submitter has no listener",
            ));
        };
        let entry = opcode::Accept::new(
            types::Fd(listener.raw_handle()),
            ptr::null_mut(),
            ptr::null_mut(),
        )
        .build()
        .user_data(token.user_data());
        // SAFETY: 提交项不引用用户内存，监听句柄的文件引用由内核在请求期间持有。
        unsafe { self.port.submit(&entry) }
    }

    fn cancel(&mut self) -> io::Result<()> {
        // 在途请求持有文件引用，先关闭监听句柄也不会让请求悬空
        self.listener = None;
        match self.token.as_ref() {
            Some(token) => self.port.cancel(token),
            None => Ok(()),
        }
    }
}

/// 把完成结果转换为连接：非负值是新句柄，负值是取反的 errno。
pub(crate) fn accepted(result: i32, options: &TcpSocketConfig) -> io::Result<ClientConnection> {
    if result < 0 {
        return Err(io::Error::from_raw_os_error(-result));
    }
    // SAFETY: 内核刚刚为这次 accept 创建了该描述符，此处是它唯一的所有者。
    let socket = unsafe { Socket::from_raw_fd(result) };
    socket.set_cloexec(true)?;
    ClientConnection::from_tcp_socket(socket, options)
}
