//! 完成模型后端的状态机。
//!
//! # 教案定位（Why）
//! - 完成模型下，连接只能由一个预先投递的异步请求捕获；若某一时刻没有请求在途，新连接就会
//!   在监听队列里等待，直到有人再次投递。因此“完成 → 补投”之间不能出现空窗，补投失败也不能被吞掉。
//! - 真正的投递动作（io_uring、其他完成端口）抽象为 [`AcceptSubmitter`]，状态机本身与平台无关，
//!   可以用脚本化的投递者在任意平台上测试。
//!
//! # 契约说明（What）
//! - `arm` 在 `Idle`/`Stalled` 时投递；投递成功进入 `AcceptPosted`；
//! - 完成到达：先从槽位取出连接，再立即补投，最后把连接交给调用方；
//! - 补投同步失败：进入 `Stalled`，产出 [`AcceptError::RepostFailed`]，并以 error 级别记录；
//!   已取出的连接照常交付；
//! - `shutdown` 对在途请求发起取消；之后到达的完成只做清理，携带的连接被立即关闭。

use super::{AcceptSignal, AcceptState, AcceptStrategy, Harvest, stopped_error};
use crate::error::{self, AcceptError};
use std::fmt;
use std::io;
use tracing::{debug, error, trace, warn};

/// 投递异步 accept 请求的一方。
pub trait AcceptSubmitter {
    /// 投递一个请求。`Ok` 表示请求已在途（包括已入队、稍后才交给内核的情况），
    /// `Err` 表示没有留下任何请求；否则 `Stalled` 之后的重投会造成两个在途请求。
    fn submit(&mut self) -> io::Result<()>;

    /// 请求取消在途请求，并释放监听句柄。被取消的请求仍会交付一次完成。
    fn cancel(&mut self) -> io::Result<()>;
}

/// 完成模型后端：始终保持恰好一个在途请求。
pub struct CompletionAcceptor<S> {
    submitter: S,
    state: AcceptState,
    completed: u64,
}

impl<S: AcceptSubmitter> CompletionAcceptor<S> {
    pub fn new(submitter: S) -> Self {
        Self {
            submitter,
            state: AcceptState::Idle,
            completed: 0,
        }
    }

    /// 已处理的完成数（含失败与停止后的清理）。
    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    pub fn submitter_mut(&mut self) -> &mut S {
        &mut self.submitter
    }

    fn post(&mut self) -> io::Result<()> {
        self.submitter.submit()?;
        self.state = AcceptState::AcceptPosted;
        Ok(())
    }
}

impl<S: AcceptSubmitter> AcceptStrategy for CompletionAcceptor<S> {
    fn arm(&mut self) -> Result<(), AcceptError> {
        match self.state {
            AcceptState::AcceptPosted => Ok(()),
            AcceptState::Stopped => Err(stopped_error()),
            AcceptState::Idle => self
                .post()
                .map_err(|source| AcceptError::setup(error::POST, source)),
            AcceptState::Stalled => {
                self.post()
                    .map_err(|source| AcceptError::RepostFailed { source })?;
                debug!("accept engine re-armed after stall");
                Ok(())
            }
        }
    }

    fn harvest(&mut self, signal: AcceptSignal) -> Harvest {
        let outcome = match signal {
            AcceptSignal::Completed(outcome) => outcome,
            AcceptSignal::Ready => {
                trace!("readiness signal ignored by completion backend");
                return Harvest::empty();
            }
        };
        self.completed += 1;

        if self.state == AcceptState::Stopped {
            // 停止后排空的完成：连接随 outcome 一起被丢弃即关闭
            debug!(
                accepted = outcome.is_ok(),
                "completion drained after stop"
            );
            return Harvest::empty();
        }
        if self.state != AcceptState::AcceptPosted {
            warn!(state = %self.state, "completion without a posted request");
        }

        // 槽位已空，立即补投
        self.state = AcceptState::Idle;
        let fault = match self.post() {
            Ok(()) => None,
            Err(source) => {
                self.state = AcceptState::Stalled;
                let err = AcceptError::RepostFailed { source };
                error!(
                    code = err.code(),
                    error = %err,
                    "accept repost failed, no accept request outstanding"
                );
                Some(err)
            }
        };

        let connection = match outcome {
            Ok(connection) => Some(connection),
            Err(source) => {
                let err = AcceptError::Accept { source };
                warn!(code = err.code(), error = %err, "asynchronous accept failed");
                None
            }
        };
        Harvest { connection, fault }
    }

    fn shutdown(&mut self) {
        if self.state == AcceptState::Stopped {
            return;
        }
        let in_flight = self.state == AcceptState::AcceptPosted;
        self.state = AcceptState::Stopped;
        if let Err(err) = self.submitter.cancel() {
            warn!(error = %err, in_flight, "accept cancel request failed");
        }
    }

    fn state(&self) -> AcceptState {
        self.state
    }
}

impl<S> fmt::Debug for CompletionAcceptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionAcceptor")
            .field("state", &self.state)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}
