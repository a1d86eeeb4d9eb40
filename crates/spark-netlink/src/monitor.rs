//! 路由 netlink 监视器。
//!
//! # 教案定位（Why）
//! - 把内核的链路/地址通知接入单线程反应器：套接字可读时接收一份电报，解码为
//!   [`InterfaceEvent`] 序列后交给应用回调；
//! - 构造期失败不可恢复，直接由 [`NetlinkMonitor::new`] 返回错误；运行期问题只记录日志。
//!
//! # 契约说明（What）
//! - `start` 先同步合成一条 `COMPLETE(0, "")`，再向反应器登记可读回调；
//! - 每次就绪只执行一次非阻塞接收，`EAGAIN` 视为虚假唤醒；
//! - `stop` 先注销再关闭套接字并清空回调，可重复调用，`Drop` 时再兜底执行一次。
//!
//! # 实现策略（How）
//! - 共享状态放在 `Rc` 中，反应器回调只持有 `Weak`，监视器销毁后残留的就绪事件自然失效；
//! - 解码期间先把事件收集到本地向量，释放所有借用后再逐个调用应用回调，
//!   因此回调内部可以安全地调用 `stop`，网卡清单也一定先于任何事件完成刷新。

use crate::adapter::AdapterCache;
use crate::config::NetlinkConfig;
use crate::decode::{PassEnd, process_telegram};
use crate::error::{self, NetlinkError};
use crate::event::InterfaceEvent;
use nix::errno::Errno;
use nix::sys::socket::{
    self, AddressFamily, MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType, sockopt,
};
use spark_reactor::{CallbackSlot, EventLoop, Registration};
use std::cell::RefCell;
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, trace, warn};

struct MonitorShared {
    socket: RefCell<Option<OwnedFd>>,
    registration: RefCell<Option<Registration>>,
    cache: RefCell<Box<dyn AdapterCache>>,
    callback: CallbackSlot<InterfaceEvent>,
    buffer: RefCell<Vec<u8>>,
}

/// 订阅内核网卡通知并把它们转成 [`InterfaceEvent`]。
///
/// # 教案式注释
///
/// - **意图 (Why)**：应用只关心“哪块网卡上线/下线、哪个地址出现/消失”，不应接触电报格式；
/// - **契约 (What)**：
///   - [`NetlinkMonitor::new`] 打开 `NETLINK_ROUTE` 套接字、开启 `SO_REUSEADDR`，并以端口号 0
///     （由内核分配，允许同一进程内存在多个监视器）绑定到配置的多播组；
///   - 每份电报在第一个链路/地址记录之前至多刷新一次网卡清单；
///   - 回调只会在驱动反应器的线程上被调用；
/// - **注意事项 (Trade-offs)**：监视器依附于构造时传入的 [`EventLoop`]，同样是 `!Send`。
pub struct NetlinkMonitor {
    event_loop: EventLoop,
    shared: Rc<MonitorShared>,
}

impl NetlinkMonitor {
    /// 打开并绑定 netlink 套接字。
    pub fn new<C>(
        event_loop: &EventLoop,
        cache: C,
        config: NetlinkConfig,
    ) -> Result<Self, NetlinkError>
    where
        C: AdapterCache + 'static,
    {
        let socket = open_socket(&config)?;
        debug!(
            fd = socket.as_raw_fd(),
            groups = config.groups().bits(),
            "netlink socket bound"
        );
        Ok(Self {
            event_loop: event_loop.clone(),
            shared: Rc::new(MonitorShared {
                socket: RefCell::new(Some(socket)),
                registration: RefCell::new(None),
                cache: RefCell::new(Box::new(cache)),
                callback: CallbackSlot::new(),
                buffer: RefCell::new(vec![0; config.receive_buffer_size()]),
            }),
        })
    }

    /// 保存回调、合成 `COMPLETE` 事件并登记可读回调。
    ///
    /// 重复调用只替换回调（并再次合成 `COMPLETE`），不会重复登记。
    pub fn start<F>(&self, callback: F) -> Result<(), NetlinkError>
    where
        F: FnMut(InterfaceEvent) + 'static,
    {
        let handle = match self.shared.socket.borrow().as_ref() {
            Some(socket) => socket.as_raw_fd(),
            None => return Err(NetlinkError::Stopped),
        };

        self.shared.callback.set(callback);
        // 订阅已生效
        if self.shared.callback.invoke(InterfaceEvent::complete()).is_err() {
            trace!("COMPLETE dropped, no callback installed");
        }

        if self.shared.registration.borrow().is_some() {
            return Ok(());
        }
        // COMPLETE 回调内部可能已经 stop
        if self.shared.socket.borrow().is_none() {
            return Err(NetlinkError::Stopped);
        }

        let weak = Rc::downgrade(&self.shared);
        let registration = self.event_loop.register(handle, move || on_readable(&weak))?;
        *self.shared.registration.borrow_mut() = Some(registration);
        info!(fd = handle, "netlink monitor started");
        Ok(())
    }

    /// 注销、关闭套接字并清空回调；重复调用为无操作。
    pub fn stop(&self) {
        let registration = self.shared.registration.borrow_mut().take();
        if let Some(registration) = registration
            && let Err(err) = self.event_loop.deregister(&registration)
        {
            warn!(code = err.code(), error = %err, "netlink deregistration failed");
        }
        // 先注销再关闭
        let socket = self.shared.socket.borrow_mut().take();
        if let Some(socket) = socket {
            debug!(fd = socket.as_raw_fd(), "netlink monitor stopped");
            drop(socket);
        }
        self.shared.callback.clear();
    }

    /// 内核为本套接字分配的 netlink 端口号；停止后为 `None`。
    pub fn port_id(&self) -> Option<u32> {
        let fd = self.shared.socket.borrow().as_ref().map(AsRawFd::as_raw_fd)?;
        match socket::getsockname::<NetlinkAddr>(fd) {
            Ok(address) => Some(address.pid()),
            Err(errno) => {
                debug!(error = %errno, "netlink getsockname failed");
                None
            }
        }
    }

    /// 是否已登记到反应器。
    pub fn is_running(&self) -> bool {
        self.shared.registration.borrow().is_some()
    }
}

impl Drop for NetlinkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for NetlinkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkMonitor")
            .field("running", &self.is_running())
            .field("callback", &self.shared.callback)
            .finish()
    }
}

fn open_socket(config: &NetlinkConfig) -> Result<OwnedFd, NetlinkError> {
    let fd = socket::socket(
        AddressFamily::Netlink,
        SockType::Raw,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        SockProtocol::NetlinkRoute,
    )
    .map_err(|errno| NetlinkError::setup(error::OPEN, errno))?;
    socket::setsockopt(&fd, sockopt::ReuseAddr, &true)
        .map_err(|errno| NetlinkError::setup(error::REUSE_ADDRESS, errno))?;
    let address = NetlinkAddr::new(0, config.groups().bits());
    socket::bind(fd.as_raw_fd(), &address)
        .map_err(|errno| NetlinkError::setup(error::BIND, errno))?;
    Ok(fd)
}

fn on_readable(shared: &Weak<MonitorShared>) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let events = receive(&shared);
    for event in events {
        if shared.callback.invoke(event).is_err() {
            trace!("netlink event dropped, no callback installed");
        }
    }
}

/// 一次接收并解码，返回待分发的事件。
fn receive(shared: &MonitorShared) -> Vec<InterfaceEvent> {
    let Some(fd) = shared.socket.borrow().as_ref().map(AsRawFd::as_raw_fd) else {
        return Vec::new();
    };
    let mut buffer = shared.buffer.borrow_mut();
    let received = match socket::recv(fd, &mut buffer[..], MsgFlags::empty()) {
        Ok(received) => received,
        Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
            trace!("spurious netlink wakeup");
            return Vec::new();
        }
        Err(Errno::ENOBUFS) => {
            // 内核丢弃了部分通知，只能等待后续电报
            warn!("netlink receive buffer overrun, notifications were lost");
            return Vec::new();
        }
        Err(errno) => {
            let err = NetlinkError::Receive(errno.into());
            error!(code = err.code(), error = %err, "netlink receive failed");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    let mut cache = shared.cache.borrow_mut();
    let summary = process_telegram(&buffer[..received], &mut **cache, |event| {
        events.push(event)
    });
    if let PassEnd::Malformed(err) = &summary.end {
        debug!(code = err.code(), received, "telegram decode abandoned");
    }
    trace!(
        received,
        records = summary.records,
        events = summary.events,
        refreshed = summary.refreshed,
        "netlink telegram processed"
    );
    events
}
