use crate::wire::NLMSG_HDRLEN;
use std::ops::BitOr;

/// 单次接收使用的缓冲大小，与内核单份数据报的上限一致。
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// 路由 netlink 多播组位图。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MulticastGroups(u32);

impl MulticastGroups {
    pub const LINK: Self = Self(0x1);
    pub const NOTIFY: Self = Self(0x2);
    pub const IPV4_IFADDR: Self = Self(0x10);
    pub const IPV4_ROUTE: Self = Self(0x40);
    pub const IPV6_IFADDR: Self = Self(0x100);

    /// 监视器默认订阅的组合：链路、通用通知、IPv4/IPv6 地址、IPv4 路由。
    pub const DEFAULT: Self = Self(
        Self::LINK.0 | Self::NOTIFY.0 | Self::IPV4_IFADDR.0 | Self::IPV6_IFADDR.0 | Self::IPV4_ROUTE.0,
    );

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MulticastGroups {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl Default for MulticastGroups {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 监视器配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让调用方在构造前决定订阅哪些多播组、接收缓冲多大，构造后不再变化；
/// - 默认值与内核通知的典型用法一致，绝大多数场景直接 `NetlinkConfig::default()`。
///
/// ## 契约（What）
/// - `groups`：绑定时写入的多播组位图；
/// - `receive_buffer_size`：单次接收缓冲，至少容纳一个记录头，默认 [`MAX_DATAGRAM_SIZE`]。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetlinkConfig {
    groups: MulticastGroups,
    receive_buffer_size: usize,
}

impl NetlinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(mut self, groups: MulticastGroups) -> Self {
        self.groups = groups;
        self
    }

    /// 设置接收缓冲大小，小于一个记录头时按记录头长度处理。
    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size.max(NLMSG_HDRLEN);
        self
    }

    pub fn groups(&self) -> MulticastGroups {
        self.groups
    }

    pub fn receive_buffer_size(&self) -> usize {
        self.receive_buffer_size
    }
}

impl Default for NetlinkConfig {
    fn default() -> Self {
        Self {
            groups: MulticastGroups::DEFAULT,
            receive_buffer_size: MAX_DATAGRAM_SIZE,
        }
    }
}
