//! 测试用电报构造器：按主机序与 4 字节对齐拼装记录与属性。

#![allow(dead_code)]

use spark_netlink::AdapterCache;
use spark_netlink::wire::{
    IFA_LOCAL, NLMSG_DONE, NLMSG_ERROR, NLMSG_HDRLEN, RTA_HDRLEN, RTM_DELADDR, RTM_DELLINK,
    RTM_NEWADDR, RTM_NEWLINK, nlmsg_align, rta_align,
};
use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

#[derive(Default)]
pub struct TelegramBuilder {
    bytes: Vec<u8>,
    sequence: u32,
}

impl TelegramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw_record(mut self, message_type: u16, payload: &[u8]) -> Self {
        self.sequence += 1;
        let len = (NLMSG_HDRLEN + payload.len()) as u32;
        self.bytes.extend_from_slice(&len.to_ne_bytes());
        self.bytes.extend_from_slice(&message_type.to_ne_bytes());
        self.bytes.extend_from_slice(&0u16.to_ne_bytes());
        self.bytes.extend_from_slice(&self.sequence.to_ne_bytes());
        self.bytes.extend_from_slice(&0u32.to_ne_bytes());
        self.bytes.extend_from_slice(payload);
        self.bytes.resize(nlmsg_align(self.bytes.len()), 0);
        self
    }

    pub fn link(self, message_type: u16, index: i32, flags: u32, change: u32) -> Self {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&index.to_ne_bytes());
        payload.extend_from_slice(&flags.to_ne_bytes());
        payload.extend_from_slice(&change.to_ne_bytes());
        self.raw_record(message_type, &payload)
    }

    pub fn new_link(self, index: i32, flags: u32, change: u32) -> Self {
        self.link(RTM_NEWLINK, index, flags, change)
    }

    pub fn del_link(self, index: i32, flags: u32) -> Self {
        self.link(RTM_DELLINK, index, flags, 0)
    }

    pub fn address(self, message_type: u16, family: u8, index: u32, attributes: &[(u16, Vec<u8>)]) -> Self {
        let mut payload = vec![family, 24, 0, 0];
        payload.extend_from_slice(&index.to_ne_bytes());
        for (attribute_type, value) in attributes {
            let len = (RTA_HDRLEN + value.len()) as u16;
            payload.extend_from_slice(&len.to_ne_bytes());
            payload.extend_from_slice(&attribute_type.to_ne_bytes());
            payload.extend_from_slice(value);
            payload.resize(rta_align(payload.len()), 0);
        }
        self.raw_record(message_type, &payload)
    }

    pub fn new_ipv4_address(self, index: u32, locals: &[Ipv4Addr]) -> Self {
        let attributes = local_attributes(locals);
        self.address(RTM_NEWADDR, 2, index, &attributes)
    }

    pub fn del_ipv4_address(self, index: u32, locals: &[Ipv4Addr]) -> Self {
        let attributes = local_attributes(locals);
        self.address(RTM_DELADDR, 2, index, &attributes)
    }

    pub fn done(self) -> Self {
        self.raw_record(NLMSG_DONE, &0i32.to_ne_bytes())
    }

    pub fn error(self, errno: i32) -> Self {
        let mut payload = errno.to_ne_bytes().to_vec();
        // 被确认的原始请求头
        payload.extend_from_slice(&[0u8; NLMSG_HDRLEN]);
        self.raw_record(NLMSG_ERROR, &payload)
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

fn local_attributes(locals: &[Ipv4Addr]) -> Vec<(u16, Vec<u8>)> {
    locals
        .iter()
        .map(|address| (IFA_LOCAL, address.octets().to_vec()))
        .collect()
}

/// 记录刷新次数的清单，测试之间通过 `Rc` 共享观察结果。
#[derive(Clone, Default)]
pub struct RecordingCache {
    pub refreshes: Rc<RefCell<Vec<usize>>>,
    pub delivered: Rc<RefCell<usize>>,
}

impl RecordingCache {
    pub fn refresh_count(&self) -> usize {
        self.refreshes.borrow().len()
    }
}

impl AdapterCache for RecordingCache {
    fn refresh(&mut self) {
        // 记录刷新时已经交付了多少事件
        let delivered = *self.delivered.borrow();
        self.refreshes.borrow_mut().push(delivered);
    }
}
