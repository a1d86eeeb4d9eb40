#![doc = r#"
# spark-transport-tcp

## 设计动机（Why）
- **定位**：在单线程反应器上接受入站 TCP（以及 Unix 域）连接，保证从 `start` 到 `stop`
  之间的任何时刻都恰有一个 accept 请求在途，不留下无法捕获新连接的空窗。
- **架构角色**：[`TcpServer`] 只依赖 `spark-reactor` 的登记契约；就绪模型与完成模型两种后端
  藏在 [`AcceptStrategy`] 之后，对调用方呈现同一套 `start`/`stop`/回调语义。
- **设计理念**：句柄所有权在 accept 完成时唯一地移交给回调（[`ClientConnection`]），
  服务器不保留任何副本。

## 核心契约（What）
- [`TcpServer::start`] 依次创建、绑定、切换非阻塞、监听、保存回调、投递首个请求并登记，
  任一步失败都以 [`AcceptError`] 返回；
- 每次完成恰好产生一次回调与一次补投；补投同步失败进入 [`AcceptState::Stalled`]，
  经 [`TcpServer::on_fault`] 上报，由 [`TcpServer::rearm`] 干预；
- [`TcpServer::stop`] 可重复调用，`Drop` 时兜底执行；停止后到达的完成被排空并丢弃。

## 实现策略（How）
- 监听套接字通过 `socket2` 分步创建，每一步都有独立的稳定错误码；
- 就绪模型：监听句柄登记到反应器，可读时执行一次非阻塞 accept；
- 完成模型（`io-uring` 特性，Linux）：经反应器的完成端口投递 `IORING_OP_ACCEPT`，
  状态机 [`CompletionAcceptor`] 与投递者 [`AcceptSubmitter`] 分离，可脱离内核单独测试。

## 风险与考量（Trade-offs）
- 就绪模型每次唤醒只接受一条连接，积压的连接依赖反应器的重新武装逐个取出；
- 完成模型的请求不携带地址缓冲，对端地址在需要时再查询。
"#]

mod backend;
mod config;
mod connection;
mod error;
mod listener;
mod server;

pub use backend::{
    AcceptSignal, AcceptState, AcceptStrategy, AcceptSubmitter, CompletionAcceptor, Harvest,
    ReadinessAcceptor,
};
#[cfg(unix)]
pub use config::UnixServerConfig;
pub use config::{AcceptBackendKind, TcpServerConfig, TcpSocketConfig};
pub use connection::ClientConnection;
pub use error::{AcceptError, OperationKind};
pub use listener::ListenAddress;
pub use server::TcpServer;
