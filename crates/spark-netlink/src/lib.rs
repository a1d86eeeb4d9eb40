#![doc = r#"
# spark-netlink

## 设计动机（Why）
- **定位**：把 Linux 内核经路由 netlink 推送的链路、地址通知翻译成应用可直接消费的
  [`InterfaceEvent`]（`LINK_ADDED`/`LINK_REMOVED`/`ADDRESS_ADDED`/`ADDRESS_REMOVED`/`COMPLETE`）。
- **架构角色**：[`NetlinkMonitor`] 挂在 `spark-reactor` 的 [`EventLoop`](spark_reactor::EventLoop) 上，
  每次套接字可读时接收一份电报；解码逻辑（[`wire`] 与 [`process_telegram`]）与套接字完全分离。
- **设计理念**：内核缓冲是不可信输入，任何长度字段都先做边界检查，越界即停止，绝不越界读取。

## 核心契约（What）
- [`NetlinkMonitor::new`] 在构造期完成打开、`SO_REUSEADDR` 与绑定，任何一步失败都返回
  [`NetlinkError::Setup`]；
- [`NetlinkMonitor::start`] 同步合成一条 `COMPLETE(0, "")` 后登记可读回调；
- 同一电报内记录按线序处理，遇到 `DONE`/`ERROR` 即结束，网卡清单至多刷新一次且早于任何事件；
- [`NetlinkMonitor::stop`] 可重复调用，`Drop` 时兜底执行。

## 实现策略（How）
- [`wire::Telegram`] / [`wire::Attributes`] 是只读游标，按 4 字节对齐前进；
- [`AdapterCache`] 是唯一的清单协作契约，Linux 上提供基于 `getifaddrs` 的 [`NetadapterList`]。

## 风险与考量（Trade-offs）
- IPv6 地址记录目前只记录调试日志、不产生事件；
- 套接字与清单实现仅在 Linux 上编译，解码部分在任意平台可用，便于测试。
"#]

mod adapter;
mod config;
mod decode;
mod error;
mod event;
#[cfg(target_os = "linux")]
mod monitor;
pub mod wire;

pub use adapter::AdapterCache;
#[cfg(target_os = "linux")]
pub use adapter::{Netadapter, NetadapterList};
pub use config::{MAX_DATAGRAM_SIZE, MulticastGroups, NetlinkConfig};
pub use decode::{PassEnd, TelegramSummary, process_telegram};
pub use error::{DecodeError, NetlinkError, OperationKind};
pub use event::{InterfaceEvent, InterfaceEventKind};
#[cfg(target_os = "linux")]
pub use monitor::NetlinkMonitor;
