#![doc = r#"
# spark-reactor

## 设计动机（Why）
- **定位**：为网络事件层提供单线程协作式反应器，netlink 监视器与 TCP accept 引擎
  都只依赖这里暴露的注册契约，而不关心底层多路复用原语。
- **架构角色**：由顶层应用构造一次，并以引用方式传给每个组件；组件在内部克隆
  [`EventLoop`] 句柄，保持“谁注册谁注销”的生命周期纪律。
- **设计理念**：注册表只在循环线程上修改，跨线程的停止请求只能置位标志并唤醒
  轮询器（见 [`StopHandle`]）。

## 核心契约（What）
- [`EventLoop::register`]：为句柄登记“可读”回调，返回 [`Registration`]；
- [`EventLoop::deregister`]：注销登记，重复注销为无操作；
- [`EventLoop::run`] / [`EventLoop::run_once`]：阻塞并按就绪顺序逐个调用回调；
- [`EventLoop::request_stop`] / [`StopHandle::request_stop`]：线程安全的停止请求；
- 启用 `io-uring` 特性时，[`EventLoop::completion_port`] 返回完成模型平台所需的完成端口。

## 实现策略（How）
- 基于 `polling` 的一次性（oneshot）登记：回调执行完毕后再重新武装，未读尽的句柄会在
  下一轮继续被唤醒；
- 回调在执行期间被临时取出注册表，因此回调内部可以安全地注册/注销其他句柄；
- 登记键单调递增且永不复用，同一轮中已注销键的就绪事件会被丢弃。

## 风险与考量（Trade-offs）
- [`EventLoop`] 使用 `Rc`/`RefCell`，因而是 `!Send`，只能在构造它的线程上驱动；
- 目前只关心可读事件，写就绪由字节流协作方自行处理。
"#]

mod callback;
#[cfg(all(target_os = "linux", feature = "io-uring"))]
mod completion;
mod error;
mod event_loop;
mod sys;

pub use callback::CallbackSlot;
#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub use completion::{CompletionPort, CompletionToken, Disposition};
pub use error::ReactorError;
pub use event_loop::{EventLoop, Registration, StopHandle};
pub use sys::RawHandle;
