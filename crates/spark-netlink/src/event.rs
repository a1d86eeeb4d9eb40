use std::fmt;
use std::net::IpAddr;

/// 网卡生命周期事件的种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterfaceEventKind {
    LinkAdded,
    LinkRemoved,
    AddressAdded,
    AddressRemoved,
    /// 订阅已生效；由 `start()` 合成，不来自内核。
    Complete,
}

impl InterfaceEventKind {
    /// 日志与诊断使用的大写名称。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkAdded => "LINK_ADDED",
            Self::LinkRemoved => "LINK_REMOVED",
            Self::AddressAdded => "ADDRESS_ADDED",
            Self::AddressRemoved => "ADDRESS_REMOVED",
            Self::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for InterfaceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 交给应用回调的网卡事件。
///
/// # 教案式注释
///
/// - **意图 (Why)**：把一条内核记录归约为“哪块网卡、发生了什么、涉及哪个地址”三元组；
/// - **契约 (What)**：链路事件与 `Complete` 的 `address` 为 `None`，地址事件携带 IPv4 地址；
///   [`InterfaceEvent::address_text`] 给出点分十进制文本，无地址时为空串；
/// - **注意事项 (Trade-offs)**：使用 [`IpAddr`] 而非字符串保存地址，调用方需要文本时再格式化。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceEvent {
    pub kind: InterfaceEventKind,
    pub interface_index: u32,
    pub address: Option<IpAddr>,
}

impl InterfaceEvent {
    pub fn link_added(interface_index: u32) -> Self {
        Self {
            kind: InterfaceEventKind::LinkAdded,
            interface_index,
            address: None,
        }
    }

    pub fn link_removed(interface_index: u32) -> Self {
        Self {
            kind: InterfaceEventKind::LinkRemoved,
            interface_index,
            address: None,
        }
    }

    pub fn address_added(interface_index: u32, address: impl Into<IpAddr>) -> Self {
        Self {
            kind: InterfaceEventKind::AddressAdded,
            interface_index,
            address: Some(address.into()),
        }
    }

    pub fn address_removed(interface_index: u32, address: impl Into<IpAddr>) -> Self {
        Self {
            kind: InterfaceEventKind::AddressRemoved,
            interface_index,
            address: Some(address.into()),
        }
    }

    /// 订阅生效事件：索引为 0，地址为空。
    pub fn complete() -> Self {
        Self {
            kind: InterfaceEventKind::Complete,
            interface_index: 0,
            address: None,
        }
    }

    /// 地址的文本形式，无地址时为空串。
    pub fn address_text(&self) -> String {
        self.address
            .map(|address| address.to_string())
            .unwrap_or_default()
    }
}

impl fmt::Display for InterfaceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}, \"{}\")",
            self.kind,
            self.interface_index,
            self.address_text()
        )
    }
}
