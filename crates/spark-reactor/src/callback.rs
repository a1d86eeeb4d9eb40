//! 组件共享的回调存放槽。
//!
//! # 教案定位（Why）
//! - netlink 监视器与 accept 引擎都要在反应器回调里再调用一次用户回调；用户回调可能反过来
//!   调用组件的 `stop()`/`start()`，若此时组件状态仍被 `RefCell` 借用就会 panic。
//! - [`CallbackSlot`] 把“取出 → 调用 → 放回”固化为一处实现，两个组件共用。
//!
//! # 契约说明（What）
//! - 调用期间槽位为空；若回调在执行中替换或清空了槽位，以新值为准，旧回调在返回后丢弃；
//! - 槽位为空时 [`CallbackSlot::invoke`] 原样返还参数，由调用方决定如何释放资源。

use std::cell::{Cell, RefCell};
use std::fmt;

type Callback<T> = Box<dyn FnMut(T)>;

/// 单线程回调槽，支持回调内部重入修改自身。
pub struct CallbackSlot<T> {
    callback: RefCell<Option<Callback<T>>>,
    generation: Cell<u64>,
}

impl<T> CallbackSlot<T> {
    /// 创建空槽。
    pub fn new() -> Self {
        Self {
            callback: RefCell::new(None),
            generation: Cell::new(0),
        }
    }

    /// 写入新回调，覆盖旧值。
    pub fn set<F>(&self, callback: F)
    where
        F: FnMut(T) + 'static,
    {
        self.replace(Some(Box::new(callback)));
    }

    /// 清空槽位。
    pub fn clear(&self) {
        self.replace(None);
    }

    /// 是否持有回调。调用进行中时返回 `false`。
    pub fn is_set(&self) -> bool {
        self.callback.borrow().is_some()
    }

    /// 调用回调；槽位为空时返还参数。
    pub fn invoke(&self, arg: T) -> Result<(), T> {
        let taken = self.callback.borrow_mut().take();
        let Some(mut callback) = taken else {
            return Err(arg);
        };
        let generation = self.generation.get();
        callback(arg);
        if self.generation.get() == generation {
            *self.callback.borrow_mut() = Some(callback);
        }
        Ok(())
    }

    fn replace(&self, callback: Option<Callback<T>>) {
        *self.callback.borrow_mut() = callback;
        self.generation.set(self.generation.get().wrapping_add(1));
    }
}

impl<T> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CallbackSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}
