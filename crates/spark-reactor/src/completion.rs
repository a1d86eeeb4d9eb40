//! 基于 io_uring 的完成端口。
//!
//! # 教案定位（Why）
//! - 完成模型下，由内核异步执行操作并在完成后通知；accept 引擎需要一个“投递请求 → 按令牌
//!   收取完成”的端口，而不是就绪通知。
//! - io_uring 的环形描述符本身可被轮询：完成队列非空时变为可读，因此把它登记到反应器，
//!   就能在同一个单线程循环里收取完成事件。
//!
//! # 契约说明（What）
//! - [`CompletionPort::register`] 为一个处理器分配令牌，投递请求时把令牌写入 `user_data`；
//! - 处理器返回 [`Disposition::Release`] 后令牌失效，之后到达的同令牌完成被排空并丢弃；
//! - [`CompletionPort::submit`] 为 `unsafe`：请求引用的缓冲必须存活到其完成被交付；
//!   返回 `Ok` 即表示请求已进入提交队列，返回 `Err` 表示队列中没有留下该请求。
//!
//! # 实现策略（How）
//! - 收取时先把完成队列整体拷出，释放环的借用后再逐个调用处理器，处理器内部可以继续投递；
//! - 入队成功但 `io_uring_enter` 失败时，请求仍留在提交队列里，由反应器在下一轮 [`CompletionPort::flush`]
//!   时交给内核，不能当作投递失败上报，否则调用方重投会让同一令牌出现两个在途请求。

#![allow(unsafe_code)]

use io_uring::{IoUring, opcode, squeue};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// 取消请求自身的完成使用的保留令牌，收取时直接丢弃。
const CANCEL_USER_DATA: u64 = u64::MAX;

type CompletionHandler = Box<dyn FnMut(i32) -> Disposition>;

/// 处理器对一次完成的处置结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// 继续接收该令牌的后续完成。
    Keep,
    /// 释放令牌，后续完成被丢弃。
    Release,
}

/// 投递请求时写入 `user_data` 的令牌。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompletionToken(u64);

impl CompletionToken {
    /// 令牌的原始值，用作提交项的 `user_data`。
    pub fn user_data(&self) -> u64 {
        self.0
    }
}

struct PortInner {
    ring: RefCell<IoUring>,
    handlers: RefCell<HashMap<u64, Option<CompletionHandler>>>,
    next_token: Cell<u64>,
    /// 提交队列中还有尚未交给内核的请求。
    unflushed: Cell<bool>,
}

/// 反应器持有的完成端口，克隆共享同一个环。
#[derive(Clone)]
pub struct CompletionPort {
    inner: Rc<PortInner>,
}

impl CompletionPort {
    pub(crate) fn new(entries: u32) -> io::Result<Self> {
        let ring = IoUring::new(entries)?;
        Ok(Self {
            inner: Rc::new(PortInner {
                ring: RefCell::new(ring),
                handlers: RefCell::new(HashMap::new()),
                next_token: Cell::new(1),
                unflushed: Cell::new(false),
            }),
        })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.inner.ring.borrow().as_raw_fd()
    }

    /// 登记完成处理器并分配令牌。
    pub fn register<F>(&self, handler: F) -> CompletionToken
    where
        F: FnMut(i32) -> Disposition + 'static,
    {
        let token = self.inner.next_token.get();
        self.inner.next_token.set(token + 1);
        self.inner
            .handlers
            .borrow_mut()
            .insert(token, Some(Box::new(handler)));
        CompletionToken(token)
    }

    /// 立即释放令牌。仍在途的请求完成后会被丢弃。
    pub fn release(&self, token: &CompletionToken) {
        self.inner.handlers.borrow_mut().remove(&token.0);
    }

    /// 投递一个提交项并立即提交给内核。
    ///
    /// # Safety
    ///
    /// 提交项引用的所有内存（地址缓冲、长度字段等）必须保持有效且不被移动，
    /// 直到该请求的完成被交付给处理器。
    pub unsafe fn submit(&self, entry: &squeue::Entry) -> io::Result<()> {
        let entered = {
            let mut ring = self.inner.ring.borrow_mut();
            // SAFETY: 调用方保证 entry 引用的内存在完成前有效。
            unsafe { ring.submission().push(entry) }.map_err(|_| {
                io::Error::new(io::ErrorKind::WouldBlock, "completion submission queue full")
            })?;
            ring.submit()
        };
        self.settle_enter(entered);
        Ok(())
    }

    /// 把之前未能交给内核的请求再提交一次。返回 `true` 表示提交队列已清空。
    pub(crate) fn flush(&self) -> bool {
        if !self.inner.unflushed.get() {
            return true;
        }
        let entered = self.inner.ring.borrow().submit();
        match entered {
            Ok(count) => {
                self.inner.unflushed.set(false);
                debug!(count, "deferred submissions entered");
                true
            }
            Err(err) => {
                trace!(error = %err, "deferred submissions still pending");
                false
            }
        }
    }

    /// 记录一次 `io_uring_enter` 的结果；失败时请求仍在队列中，只推迟到下一轮。
    fn settle_enter(&self, entered: io::Result<usize>) {
        match entered {
            Ok(_) => self.inner.unflushed.set(false),
            Err(err) => {
                self.inner.unflushed.set(true);
                warn!(error = %err, "submission queued, kernel entry deferred to the next cycle");
            }
        }
    }

    /// 请求内核取消令牌对应的在途请求；被取消的请求仍会交付一次完成。
    pub fn cancel(&self, token: &CompletionToken) -> io::Result<()> {
        let entry = opcode::AsyncCancel::new(token.0)
            .build()
            .user_data(CANCEL_USER_DATA);
        // SAFETY: 取消请求不引用任何用户内存。
        unsafe { self.submit(&entry) }
    }

    /// 排空完成队列并派发给处理器，返回派发数量。
    pub(crate) fn drain(&self) -> usize {
        let completions: Vec<(u64, i32)> = {
            let mut ring = self.inner.ring.borrow_mut();
            ring.completion()
                .map(|entry| (entry.user_data(), entry.result()))
                .collect()
        };

        let mut delivered = 0;
        for (token, result) in completions {
            if token == CANCEL_USER_DATA {
                trace!(result, "cancel request completed");
                continue;
            }
            let taken = self
                .inner
                .handlers
                .borrow_mut()
                .get_mut(&token)
                .and_then(Option::take);
            let Some(mut handler) = taken else {
                debug!(token, result, "completion for a released token discarded");
                continue;
            };
            delivered += 1;
            let disposition = handler(result);
            let mut handlers = self.inner.handlers.borrow_mut();
            match disposition {
                Disposition::Keep => {
                    if let Some(slot) = handlers.get_mut(&token) {
                        if slot.is_none() {
                            *slot = Some(handler);
                        }
                    }
                }
                Disposition::Release => {
                    handlers.remove(&token);
                }
            }
        }
        delivered
    }
}

impl fmt::Debug for CompletionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionPort")
            .field("handlers", &self.inner.handlers.borrow().len())
            .finish_non_exhaustive()
    }
}
