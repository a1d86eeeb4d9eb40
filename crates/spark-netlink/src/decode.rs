//! 电报解码与事件分发策略。
//!
//! # 教案定位（Why）
//! - 把一份电报按线序逐条归约为零个或多个 [`InterfaceEvent`]，并保证外部网卡清单在该电报
//!   第一个事件之前刷新；
//! - 与套接字完全解耦：输入是字节切片、清单与事件接收器，因此可在任何平台上用构造的
//!   电报直接测试。
//!
//! # 契约说明（What）
//! - 记录严格按线序处理，遇到 `DONE` 或 `ERROR` 即结束本次解码；
//! - 链路/地址记录（带分发策略的记录）出现时，清单至多刷新一次，且早于本电报的任何事件；
//! - 畸形记录返回 [`DecodeError`] 并放弃剩余记录，之前已产出的事件保持有效；
//! - 非 IPv4 的地址记录不产生事件：IPv6 地址变更路径有意缺省，保持与 IPv4 路径的已知差距。
//!
//! # 实现策略（How）
//! 1. [`Telegram`] 游标逐条产出记录，越界即停；
//! 2. 按记录类型查表：新链路看 change 与 UP，删链路只看 UP，地址记录走属性子游标；
//! 3. 路由记录显式忽略，其余类型记录一条 info 日志。

use crate::adapter::AdapterCache;
use crate::error::DecodeError;
use crate::event::InterfaceEvent;
use crate::wire::{
    AF_INET, IFA_LOCAL, NLMSG_DONE, NLMSG_ERROR, RTM_DELADDR, RTM_DELLINK, RTM_DELROUTE,
    RTM_NEWADDR, RTM_NEWLINK, RTM_NEWROUTE, Record, Telegram,
};
use std::net::Ipv4Addr;
use tracing::{debug, error, info, trace, warn};

/// 一次解码如何结束。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassEnd {
    /// 所有完整记录都已处理。
    Exhausted,
    /// 遇到 `DONE` 记录。
    Done,
    /// 遇到内核错误记录（`errno` 为负的错误码，0 为确认）。
    KernelError { errno: i32 },
    /// 遇到畸形记录，剩余记录被放弃。
    Malformed(DecodeError),
}

/// 一次解码的统计，供日志与测试使用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelegramSummary {
    /// 实际处理（含结束记录）的记录数。
    pub records: usize,
    /// 产出的事件数。
    pub events: usize,
    /// 是否刷新过网卡清单。
    pub refreshed: bool,
    pub end: PassEnd,
}

impl TelegramSummary {
    /// 以错误形式表达的结束原因；正常结束与内核确认返回 `None`。
    pub fn error(&self) -> Option<DecodeError> {
        match &self.end {
            PassEnd::Malformed(err) => Some(err.clone()),
            PassEnd::KernelError { errno } if *errno != 0 => {
                Some(DecodeError::KernelError { errno: *errno })
            }
            _ => None,
        }
    }
}

/// 带分发策略的记录类型；它们触发网卡清单刷新。
fn carries_policy(message_type: u16) -> bool {
    matches!(
        message_type,
        RTM_NEWLINK | RTM_DELLINK | RTM_NEWADDR | RTM_DELADDR
    )
}

/// 解码一份电报，按线序把事件交给 `sink`。
pub fn process_telegram<C, S>(bytes: &[u8], cache: &mut C, mut sink: S) -> TelegramSummary
where
    C: AdapterCache + ?Sized,
    S: FnMut(InterfaceEvent),
{
    let mut telegram = Telegram::new(bytes);
    let mut summary = TelegramSummary {
        records: 0,
        events: 0,
        refreshed: false,
        end: PassEnd::Exhausted,
    };

    for record in telegram.by_ref() {
        summary.records += 1;
        match record.message_type() {
            NLMSG_DONE => {
                summary.end = PassEnd::Done;
                return summary;
            }
            NLMSG_ERROR => {
                let errno = match record.error_code() {
                    Ok(errno) => errno,
                    Err(err) => {
                        error!(code = err.code(), error = %err, "malformed netlink error record");
                        summary.end = PassEnd::Malformed(err);
                        return summary;
                    }
                };
                if errno == 0 {
                    debug!(sequence = record.sequence(), "netlink acknowledgement");
                } else {
                    error!(errno, "error processing netlink events");
                }
                summary.end = PassEnd::KernelError { errno };
                return summary;
            }
            message_type => {
                if carries_policy(message_type) && !summary.refreshed {
                    cache.refresh();
                    summary.refreshed = true;
                }
                let mut emit = |event: InterfaceEvent| {
                    summary.events += 1;
                    sink(event);
                };
                if let Err(err) = dispatch_record(&record, &mut emit) {
                    warn!(
                        code = err.code(),
                        record_type = message_type,
                        error = %err,
                        "malformed netlink record, abandoning rest of telegram"
                    );
                    summary.end = PassEnd::Malformed(err);
                    return summary;
                }
            }
        }
    }

    if telegram.leftover() > 0 {
        warn!(
            leftover = telegram.leftover(),
            "netlink telegram ends with a truncated record"
        );
    }
    summary
}

fn dispatch_record(
    record: &Record<'_>,
    emit: &mut dyn FnMut(InterfaceEvent),
) -> Result<(), DecodeError> {
    match record.message_type() {
        RTM_NEWLINK => {
            let link = record.link_info()?;
            if link.change == 0 {
                return Ok(());
            }
            if link.is_up() {
                emit(InterfaceEvent::link_added(link.interface_index()));
            } else {
                // 网卡被拉下时内核也可能用 NEWLINK 通知
                info!(
                    interface_index = link.interface_index(),
                    "LINK_REMOVED by RTM_NEWLINK with IFF_UP = 0"
                );
                emit(InterfaceEvent::link_removed(link.interface_index()));
            }
        }
        RTM_DELLINK => {
            let link = record.link_info()?;
            if !link.is_up() {
                emit(InterfaceEvent::link_removed(link.interface_index()));
            }
        }
        RTM_NEWADDR | RTM_DELADDR => {
            let address = record.address_info()?;
            if address.family != AF_INET {
                debug!(
                    family = address.family,
                    interface_index = address.index,
                    "non-IPv4 address record ignored"
                );
                return Ok(());
            }
            for attribute in address.attributes() {
                if attribute.attribute_type() != IFA_LOCAL {
                    continue;
                }
                let octets = attribute.value().first_chunk::<4>().ok_or(
                    DecodeError::AttributeTooShort {
                        attribute_type: IFA_LOCAL,
                        required: 4,
                        actual: attribute.value().len(),
                    },
                )?;
                let local = Ipv4Addr::from(*octets);
                if record.message_type() == RTM_NEWADDR {
                    emit(InterfaceEvent::address_added(address.index, local));
                } else {
                    emit(InterfaceEvent::address_removed(address.index, local));
                }
            }
        }
        RTM_NEWROUTE | RTM_DELROUTE => {
            trace!(record_type = record.message_type(), "route record ignored");
        }
        other => {
            info!(record_type = other, "unhandled netlink event");
        }
    }
    Ok(())
}
