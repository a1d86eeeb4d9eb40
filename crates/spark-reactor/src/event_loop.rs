use crate::error::{self, ReactorError};
use crate::sys::RawHandle;
use polling::{Event, Poller};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

#[cfg(all(target_os = "linux", feature = "io-uring"))]
use crate::completion::CompletionPort;

type ReadyCallback = Box<dyn FnMut()>;

/// 完成端口提交队列的默认深度。
#[cfg(all(target_os = "linux", feature = "io-uring"))]
const COMPLETION_ENTRIES: u32 = 64;

/// 完成端口仍有未交给内核的请求时，单轮等待的上限。
#[cfg(all(target_os = "linux", feature = "io-uring"))]
const FLUSH_RETRY: Duration = Duration::from_millis(1);

struct Slot {
    handle: RawHandle,
    /// 回调执行期间为 `None`。
    callback: Option<ReadyCallback>,
}

struct LoopInner {
    poller: Arc<Poller>,
    stop_requested: Arc<AtomicBool>,
    slots: RefCell<HashMap<usize, Slot>>,
    next_key: Cell<usize>,
    events: RefCell<Vec<Event>>,
    #[cfg(all(target_os = "linux", feature = "io-uring"))]
    completion: RefCell<Option<(CompletionPort, Registration)>>,
}

/// 单线程协作式反应器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把操作系统的就绪通知转换为同步回调，供 netlink 监视器与 TCP accept 引擎共享；
/// - 应用只构造一次，再以引用传给各组件，取代进程级全局实例。
///
/// ## 逻辑 (How)
/// - 每个登记都有一个永不复用的键，`polling` 以 oneshot 方式武装；
/// - `run_once` 等待一次，然后按返回顺序逐个派发：先把回调从注册表取出，调用结束后若登记仍在，
///   再放回并重新武装；
/// - 停止请求只会置位原子标志并通过 `Poller::notify` 唤醒等待。
///
/// ## 契约 (What)
/// - **前置条件**：登记的句柄在注销之前必须保持打开；组件必须先注销再关闭句柄；
/// - **后置条件**：任意两个回调都不会并发执行，同一回调不会被重入；
/// - **错误语义**：多路复用原语失败以 [`ReactorError`] 返回，`EINTR` 被视为空轮次。
///
/// ## 注意事项 (Trade-offs)
/// - 句柄是廉价克隆的 `Rc` 包装，因此不能跨线程传递；跨线程只能持有 [`StopHandle`]。
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

/// 一次有效登记的凭据，由登记方持有并在 `stop()` 中交还。
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Registration {
    key: usize,
    handle: RawHandle,
}

impl Registration {
    /// 登记所关联的原生句柄。
    pub fn handle(&self) -> RawHandle {
        self.handle
    }
}

/// 可跨线程传递的停止请求句柄。
///
/// 只置位标志并唤醒轮询器，从不触碰注册表或回调状态，因此可以在信号处理线程中调用。
#[derive(Clone)]
pub struct StopHandle {
    stop_requested: Arc<AtomicBool>,
    poller: Arc<Poller>,
}

impl StopHandle {
    /// 请求反应器在下一次唤醒时退出 [`EventLoop::run`]。
    pub fn request_stop(&self) -> Result<(), ReactorError> {
        self.stop_requested.store(true, Ordering::Release);
        self.poller
            .notify()
            .map_err(|err| ReactorError::new(error::WAKE, err))
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field(
                "stop_requested",
                &self.stop_requested.load(Ordering::Acquire),
            )
            .finish()
    }
}

impl EventLoop {
    /// 创建反应器。
    pub fn new() -> Result<Self, ReactorError> {
        let poller = Poller::new().map_err(|err| ReactorError::new(error::CREATE, err))?;
        Ok(Self {
            inner: Rc::new(LoopInner {
                poller: Arc::new(poller),
                stop_requested: Arc::new(AtomicBool::new(false)),
                slots: RefCell::new(HashMap::new()),
                next_key: Cell::new(1),
                events: RefCell::new(Vec::new()),
                #[cfg(all(target_os = "linux", feature = "io-uring"))]
                completion: RefCell::new(None),
            }),
        })
    }

    /// 为句柄登记“可读”回调。
    pub fn register<F>(&self, handle: RawHandle, on_ready: F) -> Result<Registration, ReactorError>
    where
        F: FnMut() + 'static,
    {
        let key = self.inner.next_key.get();
        self.inner.next_key.set(key + 1);
        self.inner
            .poller
            .add(handle, Event::readable(key))
            .map_err(|err| ReactorError::new(error::REGISTER, err))?;
        self.inner.slots.borrow_mut().insert(
            key,
            Slot {
                handle,
                callback: Some(Box::new(on_ready)),
            },
        );
        debug!(key, handle = ?handle, "handle registered");
        Ok(Registration { key, handle })
    }

    /// 注销登记。已注销的登记再次注销为无操作。
    pub fn deregister(&self, registration: &Registration) -> Result<(), ReactorError> {
        let removed = self.inner.slots.borrow_mut().remove(&registration.key);
        let Some(slot) = removed else {
            return Ok(());
        };
        debug!(key = registration.key, handle = ?slot.handle, "handle deregistered");
        self.inner
            .poller
            .delete(slot.handle)
            .map_err(|err| ReactorError::new(error::DEREGISTER, err))
    }

    /// 当前仍有效的登记数量。
    pub fn registration_count(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    /// 返回可跨线程使用的停止句柄。
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_requested: Arc::clone(&self.inner.stop_requested),
            poller: Arc::clone(&self.inner.poller),
        }
    }

    /// 请求 [`EventLoop::run`] 在下一次唤醒时返回。
    pub fn request_stop(&self) -> Result<(), ReactorError> {
        self.stop_handle().request_stop()
    }

    /// 运行直到收到停止请求；停止标志在返回时被消费，反应器可以再次运行。
    pub fn run(&self) -> Result<(), ReactorError> {
        while !self.inner.stop_requested.swap(false, Ordering::AcqRel) {
            self.run_once(None)?;
        }
        debug!("event loop stopped");
        Ok(())
    }

    /// 等待一轮就绪事件并派发，返回实际调用的回调数量。
    pub fn run_once(&self, timeout: Option<Duration>) -> Result<usize, ReactorError> {
        let timeout = self.flush_completions(timeout);
        let mut events = std::mem::take(&mut *self.inner.events.borrow_mut());
        events.clear();
        let waited = self.inner.poller.wait(&mut events, timeout);
        let outcome = match waited {
            Ok(_) => {
                let mut dispatched = 0;
                for event in &events {
                    if self.dispatch(event.key) {
                        dispatched += 1;
                    }
                }
                Ok(dispatched)
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(ReactorError::new(error::WAIT, err)),
        };
        *self.inner.events.borrow_mut() = events;
        outcome
    }

    /// 把完成端口里推迟的提交交给内核；仍未清空时缩短本轮等待，保证尽快重试。
    #[cfg(all(target_os = "linux", feature = "io-uring"))]
    fn flush_completions(&self, timeout: Option<Duration>) -> Option<Duration> {
        let port = self
            .inner
            .completion
            .borrow()
            .as_ref()
            .map(|(port, _)| port.clone());
        match port {
            Some(port) if !port.flush() => {
                Some(timeout.map_or(FLUSH_RETRY, |timeout| timeout.min(FLUSH_RETRY)))
            }
            _ => timeout,
        }
    }

    #[cfg(not(all(target_os = "linux", feature = "io-uring")))]
    fn flush_completions(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout
    }

    fn dispatch(&self, key: usize) -> bool {
        let taken = self
            .inner
            .slots
            .borrow_mut()
            .get_mut(&key)
            .and_then(|slot| slot.callback.take());
        let Some(mut callback) = taken else {
            trace!(key, "readiness for a released registration discarded");
            return false;
        };

        callback();

        let mut slots = self.inner.slots.borrow_mut();
        if let Some(slot) = slots.get_mut(&key) {
            if slot.callback.is_none() {
                slot.callback = Some(callback);
            }
            if let Err(err) = self.inner.poller.modify(slot.handle, Event::readable(key)) {
                warn!(key, error = %err, "failed to re-arm registration");
            }
        }
        true
    }

    /// 返回完成端口，首次调用时创建并把其通知句柄登记到本反应器。
    #[cfg(all(target_os = "linux", feature = "io-uring"))]
    pub fn completion_port(&self) -> Result<CompletionPort, ReactorError> {
        if let Some((port, _)) = self.inner.completion.borrow().as_ref() {
            return Ok(port.clone());
        }
        let port = CompletionPort::new(COMPLETION_ENTRIES)
            .map_err(|err| ReactorError::new(error::COMPLETION, err))?;
        let drained = port.clone();
        let registration = self.register(port.raw_fd(), move || {
            drained.drain();
        })?;
        *self.inner.completion.borrow_mut() = Some((port.clone(), registration));
        Ok(port)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("registrations", &self.registration_count())
            .field(
                "stop_requested",
                &self.inner.stop_requested.load(Ordering::Acquire),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().expect("socket pair");
        a.set_nonblocking(true).expect("nonblocking");
        b.set_nonblocking(true).expect("nonblocking");
        (a, b)
    }

    #[test]
    fn readable_handle_invokes_callback() {
        let event_loop = EventLoop::new().expect("event loop");
        let (reader, mut writer) = pair();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let registration = event_loop
            .register(reader.as_raw_fd(), move || counter.set(counter.get() + 1))
            .expect("register");

        writer.write_all(b"x").expect("write");
        let dispatched = event_loop
            .run_once(Some(Duration::from_secs(1)))
            .expect("run once");

        assert_eq!(dispatched, 1);
        assert_eq!(hits.get(), 1);
        event_loop.deregister(&registration).expect("deregister");
    }

    /// 未读尽的数据会在重新武装后再次触发回调。
    #[test]
    fn undrained_handle_is_signalled_again() {
        let event_loop = EventLoop::new().expect("event loop");
        let (reader, mut writer) = pair();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let registration = event_loop
            .register(reader.as_raw_fd(), move || counter.set(counter.get() + 1))
            .expect("register");

        writer.write_all(b"xy").expect("write");
        event_loop
            .run_once(Some(Duration::from_secs(1)))
            .expect("first cycle");
        event_loop
            .run_once(Some(Duration::from_secs(1)))
            .expect("second cycle");

        assert_eq!(hits.get(), 2);
        event_loop.deregister(&registration).expect("deregister");
    }

    #[test]
    fn deregister_twice_is_noop() {
        let event_loop = EventLoop::new().expect("event loop");
        let (reader, _writer) = pair();
        let registration = event_loop
            .register(reader.as_raw_fd(), || {})
            .expect("register");

        event_loop.deregister(&registration).expect("first");
        event_loop.deregister(&registration).expect("second");
        assert_eq!(event_loop.registration_count(), 0);
    }

    /// 回调内部注销自身后，不会被放回注册表。
    #[test]
    fn callback_may_deregister_itself() {
        let event_loop = EventLoop::new().expect("event loop");
        let (reader, mut writer) = pair();
        let slot: Rc<RefCell<Option<Registration>>> = Rc::new(RefCell::new(None));
        let inner_loop = event_loop.clone();
        let inner_slot = Rc::clone(&slot);
        let registration = event_loop
            .register(reader.as_raw_fd(), move || {
                if let Some(registration) = inner_slot.borrow_mut().take() {
                    inner_loop.deregister(&registration).expect("deregister");
                }
            })
            .expect("register");
        *slot.borrow_mut() = Some(registration);

        writer.write_all(b"x").expect("write");
        event_loop
            .run_once(Some(Duration::from_secs(1)))
            .expect("run once");

        assert_eq!(event_loop.registration_count(), 0);
    }

    #[test]
    fn stop_requested_before_run_returns_immediately() {
        let event_loop = EventLoop::new().expect("event loop");
        event_loop.request_stop().expect("stop");
        event_loop.run().expect("run");
    }
}
