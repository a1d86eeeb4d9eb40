use super::{AcceptSignal, AcceptState, AcceptStrategy, Harvest, stopped_error};
use crate::error::AcceptError;
use crate::listener::Listener;
use spark_reactor::RawHandle;
use std::io;
use tracing::{debug, trace, warn};

/// 就绪模型后端：监听句柄可读时执行一次非阻塞 accept。
///
/// 内核的监听队列本身就是常驻的 accept 请求，所以 `arm` 之后状态一直是
/// [`AcceptState::AcceptPosted`]，直到 `shutdown`。每次就绪只接受一条连接，队列中剩余的连接
/// 由反应器在下一轮再次唤醒。
#[derive(Debug)]
pub struct ReadinessAcceptor {
    listener: Option<Listener>,
    state: AcceptState,
}

impl ReadinessAcceptor {
    pub(crate) fn new(listener: Listener) -> Self {
        Self {
            listener: Some(listener),
            state: AcceptState::Idle,
        }
    }

    pub(crate) fn raw_handle(&self) -> Option<RawHandle> {
        self.listener.as_ref().map(Listener::raw_handle)
    }
}

impl AcceptStrategy for ReadinessAcceptor {
    fn arm(&mut self) -> Result<(), AcceptError> {
        match self.state {
            AcceptState::Stopped => Err(stopped_error()),
            _ => {
                self.state = AcceptState::AcceptPosted;
                Ok(())
            }
        }
    }

    fn harvest(&mut self, signal: AcceptSignal) -> Harvest {
        if !matches!(signal, AcceptSignal::Ready) {
            debug!("completion signal ignored by readiness backend");
            return Harvest::empty();
        }
        let Some(listener) = self.listener.as_ref() else {
            return Harvest::empty();
        };
        match listener.accept() {
            Ok(connection) => {
                trace!(address = %listener.address(), "connection accepted");
                Harvest {
                    connection: Some(connection),
                    fault: None,
                }
            }
            Err(err) if matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
            {
                trace!("spurious listener wakeup");
                Harvest::empty()
            }
            Err(source) => {
                // 对端在排队期间复位等情况，只影响这一条连接
                let err = AcceptError::Accept { source };
                warn!(code = err.code(), error = %err, "accept failed");
                Harvest::empty()
            }
        }
    }

    fn shutdown(&mut self) {
        self.listener = None;
        self.state = AcceptState::Stopped;
    }

    fn state(&self) -> AcceptState {
        self.state
    }
}
