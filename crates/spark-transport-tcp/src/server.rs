//! accept 引擎的对外入口。
//!
//! # 教案定位（Why）
//! - 把“监听套接字 + 常驻 accept 请求 + 反应器登记 + 应用回调”组装成一个对象，调用方只需
//!   `start` / `stop`；
//! - 启动失败以返回值报告（可恢复），与 netlink 监视器“构造即失败”的策略刻意不同。
//!
//! # 契约说明（What）
//! - `start` 按“创建 → 绑定 → 非阻塞 → 监听 → 保存回调 → 投递首个请求 → 登记”的顺序执行，
//!   任一步失败都返回 [`AcceptError`]，已创建的资源随之释放；
//! - `stop` 先注销再关闭监听句柄，可重复调用，`Drop` 时再兜底执行一次；已交付的连接不受影响；
//! - 补投失败经 [`TcpServer::on_fault`] 注册的观察者上报，[`TcpServer::rearm`] 负责干预。
//!
//! # 实现策略（How）
//! - 后端以 `Rc<RefCell<dyn AcceptStrategy>>` 共享给反应器回调或完成处理器；
//! - 回调与故障观察者放在 [`CallbackSlot`] 中，后端借用释放之后再调用，回调内部可以安全地 `stop`。

use crate::backend::{AcceptSignal, AcceptState, AcceptStrategy, Harvest, ReadinessAcceptor};
use crate::config::{AcceptBackendKind, TcpServerConfig};
use crate::connection::ClientConnection;
use crate::error::AcceptError;
use crate::listener::{ListenAddress, Listener};
use spark_reactor::{CallbackSlot, EventLoop, Registration};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, warn};

#[cfg(unix)]
use crate::config::UnixServerConfig;

#[cfg(all(target_os = "linux", feature = "io-uring"))]
use spark_reactor::{CompletionPort, CompletionToken, Disposition};

type SharedStrategy = Rc<RefCell<dyn AcceptStrategy>>;

enum Binding {
    Reactor(Registration),
    #[cfg(all(target_os = "linux", feature = "io-uring"))]
    Completion {
        port: CompletionPort,
        token: CompletionToken,
    },
    /// 测试直接驱动后端，不经过反应器。
    #[cfg(test)]
    Detached,
}

struct Active {
    strategy: SharedStrategy,
    address: ListenAddress,
    binding: Binding,
}

struct ServerShared {
    active: RefCell<Option<Active>>,
    stopped: Cell<bool>,
    callback: CallbackSlot<ClientConnection>,
    on_fault: CallbackSlot<AcceptError>,
}

/// 常驻一个 accept 请求的监听服务器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 任何时刻都能捕获新到达的连接：启动后、停止前始终恰有一个 accept 请求在途；
/// - 两种后端（就绪/完成）对调用方呈现同一套 `start`/`stop`/回调契约。
///
/// ## 契约 (What)
/// - 每条被接受的连接恰好交给回调一次，所有权随之转移；未设置回调时连接被直接关闭；
/// - [`TcpServer::state`] 反映后端槽位状态；
/// - 停止后可以再次 `start`，会重新创建监听套接字。
///
/// ## 注意事项 (Trade-offs)
/// - 依附于构造时传入的 [`EventLoop`]，同样是 `!Send`；
/// - 完成模型后端在停止后仍会保留槽位，直到被取消请求的完成被排空。
pub struct TcpServer {
    event_loop: EventLoop,
    shared: Rc<ServerShared>,
}

impl TcpServer {
    pub fn new(event_loop: &EventLoop) -> Self {
        Self {
            event_loop: event_loop.clone(),
            shared: Rc::new(ServerShared {
                active: RefCell::new(None),
                stopped: Cell::new(false),
                callback: CallbackSlot::new(),
                on_fault: CallbackSlot::new(),
            }),
        }
    }

    /// 在所有本地 IPv4 地址的 `port` 上监听。
    pub fn start<F>(&self, port: u16, backlog: i32, callback: F) -> Result<(), AcceptError>
    where
        F: FnMut(ClientConnection) + 'static,
    {
        self.start_with_config(TcpServerConfig::new(port, backlog), callback)
    }

    /// 按完整配置启动 TCP 监听。
    pub fn start_with_config<F>(
        &self,
        config: TcpServerConfig,
        callback: F,
    ) -> Result<(), AcceptError>
    where
        F: FnMut(ClientConnection) + 'static,
    {
        self.ensure_idle()?;
        let listener = Listener::bind_tcp(&config)?;
        self.shared.callback.set(callback);
        let activated = match config.backend() {
            AcceptBackendKind::Readiness => self.activate_readiness(listener),
            AcceptBackendKind::Completion => self.activate_completion(listener),
        };
        self.finish_start(activated, config.backlog())
    }

    /// 在 Unix 域套接字上监听（就绪模型）。
    #[cfg(unix)]
    pub fn start_unix<F>(&self, config: UnixServerConfig, callback: F) -> Result<(), AcceptError>
    where
        F: FnMut(ClientConnection) + 'static,
    {
        self.ensure_idle()?;
        let listener = Listener::bind_unix(&config)?;
        self.shared.callback.set(callback);
        let activated = self.activate_readiness(listener);
        self.finish_start(activated, config.backlog())
    }

    /// 注销、取消在途请求并关闭监听句柄；重复调用为无操作。
    pub fn stop(&self) {
        let active = self.shared.active.borrow_mut().take();
        let Some(active) = active else {
            return;
        };
        match &active.binding {
            Binding::Reactor(registration) => {
                if let Err(err) = self.event_loop.deregister(registration) {
                    warn!(code = err.code(), error = %err, "listener deregistration failed");
                }
                active.strategy.borrow_mut().shutdown();
            }
            #[cfg(all(target_os = "linux", feature = "io-uring"))]
            Binding::Completion { port, token } => {
                let in_flight = active.strategy.borrow().state() == AcceptState::AcceptPosted;
                active.strategy.borrow_mut().shutdown();
                // 有在途请求时由其完成释放令牌
                if !in_flight {
                    port.release(token);
                }
            }
            #[cfg(test)]
            Binding::Detached => active.strategy.borrow_mut().shutdown(),
        }
        self.shared.stopped.set(true);
        self.shared.callback.clear();
        info!(address = %active.address, "tcp server stopped");
    }

    /// 实际监听的地址；未启动时为 `None`。
    pub fn local_addr(&self) -> Option<ListenAddress> {
        self.shared
            .active
            .borrow()
            .as_ref()
            .map(|active| active.address.clone())
    }

    pub fn state(&self) -> AcceptState {
        match self.shared.active.borrow().as_ref() {
            Some(active) => active.strategy.borrow().state(),
            None if self.shared.stopped.get() => AcceptState::Stopped,
            None => AcceptState::Idle,
        }
    }

    /// 注册补投失败的观察者。
    pub fn on_fault<F>(&self, observer: F)
    where
        F: FnMut(AcceptError) + 'static,
    {
        self.shared.on_fault.set(observer);
    }

    /// 补投失败后的干预：重新投递 accept 请求。
    pub fn rearm(&self) -> Result<(), AcceptError> {
        let strategy = match self.shared.active.borrow().as_ref() {
            Some(active) => active.strategy.clone(),
            None => return Err(crate::backend::stopped_error()),
        };
        strategy.borrow_mut().arm()
    }

    fn ensure_idle(&self) -> Result<(), AcceptError> {
        if self.shared.active.borrow().is_some() {
            return Err(AcceptError::AlreadyStarted);
        }
        Ok(())
    }

    fn finish_start(
        &self,
        activated: Result<Active, AcceptError>,
        backlog: i32,
    ) -> Result<(), AcceptError> {
        match activated {
            Ok(active) => {
                info!(address = %active.address, backlog, "tcp server listening");
                *self.shared.active.borrow_mut() = Some(active);
                self.shared.stopped.set(false);
                Ok(())
            }
            Err(err) => {
                self.shared.callback.clear();
                error!(code = err.code(), error = %err, "tcp server start failed");
                Err(err)
            }
        }
    }

    fn activate_readiness(&self, listener: Listener) -> Result<Active, AcceptError> {
        let address = listener.address().clone();
        let mut acceptor = ReadinessAcceptor::new(listener);
        let handle = acceptor
            .raw_handle()
            .ok_or_else(crate::backend::stopped_error)?;
        acceptor.arm()?;
        let strategy: SharedStrategy = Rc::new(RefCell::new(acceptor));

        let on_ready = strategy.clone();
        let weak = Rc::downgrade(&self.shared);
        let registration = self.event_loop.register(handle, move || {
            let harvest = on_ready.borrow_mut().harvest(AcceptSignal::Ready);
            deliver(&weak, harvest);
        })?;
        Ok(Active {
            strategy,
            address,
            binding: Binding::Reactor(registration),
        })
    }

    #[cfg(all(target_os = "linux", feature = "io-uring"))]
    fn activate_completion(&self, listener: Listener) -> Result<Active, AcceptError> {
        use crate::backend::CompletionAcceptor;
        use crate::backend::uring::{UringSubmitter, accepted};

        let address = listener.address().clone();
        let options = listener.options().clone();
        let port = self.event_loop.completion_port()?;
        let acceptor = Rc::new(RefCell::new(CompletionAcceptor::new(UringSubmitter::new(
            port.clone(),
            listener,
        ))));

        let on_complete = acceptor.clone();
        let weak = Rc::downgrade(&self.shared);
        let token = port.register(move |result| {
            let outcome = accepted(result, &options);
            let harvest = on_complete
                .borrow_mut()
                .harvest(AcceptSignal::Completed(outcome));
            // 停止后到达的完成就是最后一个，回调中途 stop 时仍有一个请求待排空
            let drained = on_complete.borrow().state() == AcceptState::Stopped;
            deliver(&weak, harvest);
            if drained {
                Disposition::Release
            } else {
                Disposition::Keep
            }
        });
        acceptor.borrow_mut().submitter_mut().bind_token(token.clone());

        if let Err(err) = acceptor.borrow_mut().arm() {
            port.release(&token);
            return Err(err);
        }
        let strategy: SharedStrategy = acceptor;
        Ok(Active {
            strategy,
            address,
            binding: Binding::Completion { port, token },
        })
    }

    #[cfg(not(all(target_os = "linux", feature = "io-uring")))]
    fn activate_completion(&self, _listener: Listener) -> Result<Active, AcceptError> {
        Err(AcceptError::Unsupported("completion accept backend"))
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpServer")
            .field("address", &self.local_addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// 先上报故障，再交付连接；服务器已销毁或未设置回调时连接被关闭。
fn deliver(shared: &Weak<ServerShared>, harvest: Harvest) {
    let Harvest { connection, fault } = harvest;
    let Some(shared) = shared.upgrade() else {
        if connection.is_some() {
            debug!("tcp server gone, accepted connection closed");
        }
        return;
    };
    if let Some(fault) = fault
        && let Err(fault) = shared.on_fault.invoke(fault)
    {
        debug!(code = fault.code(), "no fault observer installed");
    }
    if let Some(connection) = connection
        && let Err(connection) = shared.callback.invoke(connection)
    {
        debug!(peer = ?connection.peer_addr(), "no accept callback, connection closed");
    }
}
