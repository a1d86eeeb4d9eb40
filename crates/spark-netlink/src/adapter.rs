//! 网卡清单缓存契约。
//!
//! # 教案定位（Why）
//! - 监视器在分发某份电报的第一个事件之前，必须先让外部的网卡清单刷新一次，
//!   这样应用在回调里查询清单时看到的已经是变更后的状态。
//! - 清单本身属于外部协作方，这里只规定唯一的 [`AdapterCache::refresh`] 操作，并为 Linux
//!   提供一个基于 `getifaddrs` 的 [`NetadapterList`] 实现。

use std::cell::RefCell;
use std::rc::Rc;

/// 监视器消费的网卡清单契约。
pub trait AdapterCache {
    /// 重新采集网卡信息。失败应在实现内部记录，不影响事件分发。
    fn refresh(&mut self);
}

impl AdapterCache for () {
    fn refresh(&mut self) {}
}

impl<T: AdapterCache + ?Sized> AdapterCache for Box<T> {
    fn refresh(&mut self) {
        (**self).refresh();
    }
}

/// 应用与监视器共享同一份清单时使用。
impl<T: AdapterCache + ?Sized> AdapterCache for Rc<RefCell<T>> {
    fn refresh(&mut self) {
        self.borrow_mut().refresh();
    }
}

#[cfg(target_os = "linux")]
pub use self::linux::{Netadapter, NetadapterList};

#[cfg(target_os = "linux")]
mod linux {
    use super::AdapterCache;
    use nix::ifaddrs::getifaddrs;
    use nix::net::if_::if_nametoindex;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use tracing::{debug, warn};

    /// 单块网卡的快照。
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Netadapter {
        pub index: u32,
        pub name: String,
        pub ipv4_addresses: Vec<Ipv4Addr>,
    }

    /// 按网卡索引排列的网卡清单。
    ///
    /// # 教案式注释
    ///
    /// - **意图 (Why)**：让应用在收到 `LINK_*`/`ADDRESS_*` 事件后，能按索引查到网卡名称与
    ///   当前全部 IPv4 地址；
    /// - **逻辑 (How)**：`refresh` 调用 `getifaddrs` 全量重建，失败时保留旧快照并告警；
    /// - **契约 (What)**：[`NetadapterList::new`] 返回空清单，首次 `refresh`（或 [`NetadapterList::collect`]）
    ///   之后才有内容。
    #[derive(Clone, Debug, Default)]
    pub struct NetadapterList {
        adapters: BTreeMap<u32, Netadapter>,
    }

    impl NetadapterList {
        pub fn new() -> Self {
            Self::default()
        }

        /// 立即采集一次。
        pub fn collect() -> nix::Result<Self> {
            Ok(Self {
                adapters: enumerate()?,
            })
        }

        pub fn adapters(&self) -> impl Iterator<Item = &Netadapter> {
            self.adapters.values()
        }

        pub fn get(&self, index: u32) -> Option<&Netadapter> {
            self.adapters.get(&index)
        }

        pub fn len(&self) -> usize {
            self.adapters.len()
        }

        pub fn is_empty(&self) -> bool {
            self.adapters.is_empty()
        }
    }

    impl AdapterCache for NetadapterList {
        fn refresh(&mut self) {
            match enumerate() {
                Ok(adapters) => {
                    debug!(count = adapters.len(), "adapter list refreshed");
                    self.adapters = adapters;
                }
                Err(err) => warn!(error = %err, "adapter list refresh failed, keeping previous snapshot"),
            }
        }
    }

    fn enumerate() -> nix::Result<BTreeMap<u32, Netadapter>> {
        let mut adapters = BTreeMap::new();
        for entry in getifaddrs()? {
            let index = match if_nametoindex(entry.interface_name.as_str()) {
                Ok(index) => index,
                // 网卡在枚举过程中消失
                Err(_) => continue,
            };
            let adapter = adapters.entry(index).or_insert_with(|| Netadapter {
                index,
                name: entry.interface_name.clone(),
                ipv4_addresses: Vec::new(),
            });
            if let Some(sin) = entry.address.as_ref().and_then(|addr| addr.as_sockaddr_in()) {
                let ip = sin.ip();
                if !adapter.ipv4_addresses.contains(&ip) {
                    adapter.ipv4_addresses.push(ip);
                }
            }
        }
        Ok(adapters)
    }

}
