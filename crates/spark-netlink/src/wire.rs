//! 内核路由通知报文的只读游标。
//!
//! # 教案定位（Why）
//! - 一份电报（telegram）是一次 `recv` 收到的数据报，内含若干变长记录；地址记录内部又嵌套
//!   若干类型/长度/值属性。这里用基于不可变切片的游标逐条前进，任何一步都不会越过
//!   声明的缓冲长度。
//!
//! # 契约说明（What）
//! - 字节序为主机序，记录与属性均按 4 字节对齐，与内核 ABI 一致；
//! - [`Telegram`] 在“剩余字节放不下一个头部”或“声明长度越过剩余字节”时结束迭代，
//!   语义等同 `NLMSG_OK`/`NLMSG_NEXT`；[`Attributes`] 同理对应 `RTA_OK`/`RTA_NEXT`；
//! - 固定载荷（`ifinfomsg`/`ifaddrmsg`）长度不足时返回 [`DecodeError::PayloadTooShort`]。
//!
//! # 实现策略（How）
//! - 所有读取都经由 `first_chunk` 获取定长数组，长度不足即返回 `None`，不存在索引越界。

use crate::error::DecodeError;

/// 记录对齐单位。
pub const NLMSG_ALIGNTO: usize = 4;
/// 记录头长度：长度、类型、标志、序号、端口号。
pub const NLMSG_HDRLEN: usize = 16;
/// 属性对齐单位。
pub const RTA_ALIGNTO: usize = 4;
/// 属性头长度：长度、类型。
pub const RTA_HDRLEN: usize = 4;

/// 空操作记录。
pub const NLMSG_NOOP: u16 = 1;
/// 内核报错（或确认）记录。
pub const NLMSG_ERROR: u16 = 2;
/// 多段消息结束记录。
pub const NLMSG_DONE: u16 = 3;
/// 数据丢失记录。
pub const NLMSG_OVERRUN: u16 = 4;

pub const RTM_NEWLINK: u16 = 16;
pub const RTM_DELLINK: u16 = 17;
pub const RTM_NEWADDR: u16 = 20;
pub const RTM_DELADDR: u16 = 21;
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;

/// `ifinfomsg` 长度。
pub const IFINFOMSG_LEN: usize = 16;
/// `ifaddrmsg` 长度。
pub const IFADDRMSG_LEN: usize = 8;

pub const IFA_ADDRESS: u16 = 1;
pub const IFA_LOCAL: u16 = 2;

pub const AF_INET: u8 = 2;
pub const AF_INET6: u8 = 10;

/// 网卡处于启用状态。
pub const IFF_UP: u32 = 0x1;

/// 按记录对齐单位向上取整。
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// 按属性对齐单位向上取整。
pub const fn rta_align(len: usize) -> usize {
    (len + RTA_ALIGNTO - 1) & !(RTA_ALIGNTO - 1)
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes
        .get(offset..)?
        .first_chunk::<2>()
        .map(|chunk| u16::from_ne_bytes(*chunk))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..)?
        .first_chunk::<4>()
        .map(|chunk| u32::from_ne_bytes(*chunk))
}

fn read_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    bytes
        .get(offset..)?
        .first_chunk::<4>()
        .map(|chunk| i32::from_ne_bytes(*chunk))
}

/// 电报中的一条记录。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record<'a> {
    message_type: u16,
    flags: u16,
    sequence: u32,
    port_id: u32,
    payload: &'a [u8],
}

impl<'a> Record<'a> {
    /// 记录类型，例如 [`RTM_NEWLINK`]。
    pub fn message_type(&self) -> u16 {
        self.message_type
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn port_id(&self) -> u32 {
        self.port_id
    }

    /// 头部之后、声明长度之内的载荷。
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// `NLMSG_ERROR` 记录携带的错误码（负的 errno，0 表示确认）。
    pub fn error_code(&self) -> Result<i32, DecodeError> {
        read_i32(self.payload, 0).ok_or(DecodeError::PayloadTooShort {
            record_type: self.message_type,
            required: 4,
            actual: self.payload.len(),
        })
    }

    /// 把载荷解释为 `ifinfomsg`。
    pub fn link_info(&self) -> Result<LinkInfo, DecodeError> {
        LinkInfo::parse(self.message_type, self.payload)
    }

    /// 把载荷解释为 `ifaddrmsg` 及其后的属性区。
    pub fn address_info(&self) -> Result<AddressInfo<'a>, DecodeError> {
        AddressInfo::parse(self.message_type, self.payload)
    }
}

/// 电报游标，逐条产出 [`Record`]。
#[derive(Clone, Debug)]
pub struct Telegram<'a> {
    remaining: &'a [u8],
}

impl<'a> Telegram<'a> {
    /// 以一次接收的有效字节构造游标。
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes }
    }

    /// 迭代结束后尚未消费的字节数；非零说明尾部被截断或长度字段非法。
    pub fn leftover(&self) -> usize {
        self.remaining.len()
    }
}

impl<'a> Iterator for Telegram<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.remaining;
        let declared = read_u32(bytes, 0)? as usize;
        if bytes.len() < NLMSG_HDRLEN || declared < NLMSG_HDRLEN || declared > bytes.len() {
            return None;
        }
        let record = Record {
            message_type: read_u16(bytes, 4)?,
            flags: read_u16(bytes, 6)?,
            sequence: read_u32(bytes, 8)?,
            port_id: read_u32(bytes, 12)?,
            payload: bytes.get(NLMSG_HDRLEN..declared)?,
        };
        self.remaining = bytes.get(nlmsg_align(declared)..).unwrap_or_default();
        Some(record)
    }
}

/// 嵌套属性。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attribute<'a> {
    attribute_type: u16,
    value: &'a [u8],
}

impl<'a> Attribute<'a> {
    pub fn attribute_type(&self) -> u16 {
        self.attribute_type
    }

    pub fn value(&self) -> &'a [u8] {
        self.value
    }
}

/// 属性子游标，只在给定子切片内前进。
#[derive(Clone, Debug)]
pub struct Attributes<'a> {
    remaining: &'a [u8],
}

impl<'a> Attributes<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = Attribute<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.remaining;
        let declared = read_u16(bytes, 0)? as usize;
        if bytes.len() < RTA_HDRLEN || declared < RTA_HDRLEN || declared > bytes.len() {
            return None;
        }
        let attribute = Attribute {
            attribute_type: read_u16(bytes, 2)?,
            value: bytes.get(RTA_HDRLEN..declared)?,
        };
        self.remaining = bytes.get(rta_align(declared)..).unwrap_or_default();
        Some(attribute)
    }
}

/// `ifinfomsg`：链路记录的固定载荷。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub family: u8,
    pub device_type: u16,
    pub index: i32,
    pub flags: u32,
    pub change: u32,
}

impl LinkInfo {
    fn parse(record_type: u16, payload: &[u8]) -> Result<Self, DecodeError> {
        let too_short = DecodeError::PayloadTooShort {
            record_type,
            required: IFINFOMSG_LEN,
            actual: payload.len(),
        };
        if payload.len() < IFINFOMSG_LEN {
            return Err(too_short);
        }
        Ok(Self {
            family: payload[0],
            device_type: read_u16(payload, 2).ok_or(too_short.clone())?,
            index: read_i32(payload, 4).ok_or(too_short.clone())?,
            flags: read_u32(payload, 8).ok_or(too_short.clone())?,
            change: read_u32(payload, 12).ok_or(too_short)?,
        })
    }

    /// 网卡是否处于 UP 状态。
    pub fn is_up(&self) -> bool {
        self.flags & IFF_UP != 0
    }

    /// 内核给出的网卡索引，按无符号值对外暴露。
    pub fn interface_index(&self) -> u32 {
        self.index as u32
    }
}

/// `ifaddrmsg`：地址记录的固定载荷与其后的属性区。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressInfo<'a> {
    pub family: u8,
    pub prefix_len: u8,
    pub flags: u8,
    pub scope: u8,
    pub index: u32,
    attributes: &'a [u8],
}

impl<'a> AddressInfo<'a> {
    fn parse(record_type: u16, payload: &'a [u8]) -> Result<Self, DecodeError> {
        let too_short = DecodeError::PayloadTooShort {
            record_type,
            required: IFADDRMSG_LEN,
            actual: payload.len(),
        };
        if payload.len() < IFADDRMSG_LEN {
            return Err(too_short);
        }
        Ok(Self {
            family: payload[0],
            prefix_len: payload[1],
            flags: payload[2],
            scope: payload[3],
            index: read_u32(payload, 4).ok_or(too_short)?,
            attributes: payload
                .get(nlmsg_align(IFADDRMSG_LEN)..)
                .unwrap_or_default(),
        })
    }

    /// 固定载荷之后的属性游标。
    pub fn attributes(&self) -> Attributes<'a> {
        Attributes::new(self.attributes)
    }
}
