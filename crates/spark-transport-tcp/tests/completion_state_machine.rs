//! 完成模型状态机：用脚本化的投递者驱动，不依赖内核的异步 accept。

use spark_transport_tcp::{
    AcceptError, AcceptSignal, AcceptState, AcceptStrategy, AcceptSubmitter, ClientConnection,
    CompletionAcceptor,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use tracing_test::traced_test;

#[derive(Default)]
struct Script {
    /// 依次消耗的投递结果；耗尽后一律成功。
    outcomes: VecDeque<io::Result<()>>,
    submitted: usize,
    cancelled: usize,
}

#[derive(Clone, Default)]
struct ScriptedSubmitter(Rc<RefCell<Script>>);

impl ScriptedSubmitter {
    fn failing_on(calls: &[bool]) -> Self {
        let submitter = Self::default();
        submitter.0.borrow_mut().outcomes = calls
            .iter()
            .map(|&ok| {
                if ok {
                    Ok(())
                } else {
                    Err(io::Error::other("submission queue full"))
                }
            })
            .collect();
        submitter
    }

    fn submitted(&self) -> usize {
        self.0.borrow().submitted
    }

    fn cancelled(&self) -> usize {
        self.0.borrow().cancelled
    }
}

impl AcceptSubmitter for ScriptedSubmitter {
    fn submit(&mut self) -> io::Result<()> {
        let mut script = self.0.borrow_mut();
        let outcome = script.outcomes.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            script.submitted += 1;
        }
        outcome
    }

    fn cancel(&mut self) -> io::Result<()> {
        self.0.borrow_mut().cancelled += 1;
        Ok(())
    }
}

/// 通过真实回环连接制造一个已接受的连接。
fn accepted_connection() -> (ClientConnection, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server_side, _) = listener.accept().unwrap();
    (ClientConnection::from(server_side), client)
}

fn completed(connection: ClientConnection) -> AcceptSignal {
    AcceptSignal::Completed(Ok(connection))
}

#[test]
fn arm_posts_exactly_one_request() {
    let submitter = ScriptedSubmitter::default();
    let mut acceptor = CompletionAcceptor::new(submitter.clone());
    assert_eq!(acceptor.state(), AcceptState::Idle);

    acceptor.arm().unwrap();
    acceptor.arm().unwrap();

    assert_eq!(acceptor.state(), AcceptState::AcceptPosted);
    assert_eq!(submitter.submitted(), 1);
}

#[test]
fn initial_post_failure_is_a_setup_error() {
    let submitter = ScriptedSubmitter::failing_on(&[false]);
    let mut acceptor = CompletionAcceptor::new(submitter);

    let err = acceptor.arm().unwrap_err();

    assert_eq!(err.code(), "spark.transport.tcp.post_failed");
    assert_eq!(acceptor.state(), AcceptState::Idle);
}

#[test]
fn every_completion_reposts_before_delivery() {
    let submitter = ScriptedSubmitter::default();
    let mut acceptor = CompletionAcceptor::new(submitter.clone());
    acceptor.arm().unwrap();

    for round in 1..=3 {
        let (connection, _client) = accepted_connection();
        let harvest = acceptor.harvest(completed(connection));
        assert!(harvest.connection.is_some());
        assert!(harvest.fault.is_none());
        assert_eq!(submitter.submitted(), round + 1);
        assert_eq!(acceptor.state(), AcceptState::AcceptPosted);
    }
    assert_eq!(acceptor.completed(), 3);
}

#[test]
fn failed_accept_still_reposts() {
    let submitter = ScriptedSubmitter::default();
    let mut acceptor = CompletionAcceptor::new(submitter.clone());
    acceptor.arm().unwrap();

    let harvest = acceptor.harvest(AcceptSignal::Completed(Err(io::Error::from(
        io::ErrorKind::ConnectionAborted,
    ))));

    assert!(harvest.is_empty());
    assert_eq!(submitter.submitted(), 2);
    assert_eq!(acceptor.state(), AcceptState::AcceptPosted);
}

#[traced_test]
#[test]
fn repost_failure_stalls_and_reports_but_delivers_the_connection() {
    let submitter = ScriptedSubmitter::failing_on(&[true, false]);
    let mut acceptor = CompletionAcceptor::new(submitter.clone());
    acceptor.arm().unwrap();

    let (connection, _client) = accepted_connection();
    let harvest = acceptor.harvest(completed(connection));

    assert!(harvest.connection.is_some());
    let fault = harvest.fault.expect("repost failure reported");
    assert!(matches!(fault, AcceptError::RepostFailed { .. }));
    assert_eq!(fault.code(), "spark.transport.tcp.repost_failed");
    assert_eq!(acceptor.state(), AcceptState::Stalled);
    assert_eq!(submitter.submitted(), 1);
    assert!(logs_contain("no accept request outstanding"));
}

#[test]
fn stalled_acceptor_recovers_through_arm() {
    let submitter = ScriptedSubmitter::failing_on(&[true, false, false]);
    let mut acceptor = CompletionAcceptor::new(submitter.clone());
    acceptor.arm().unwrap();
    let (connection, _client) = accepted_connection();
    acceptor.harvest(completed(connection));
    assert_eq!(acceptor.state(), AcceptState::Stalled);

    let err = acceptor.arm().unwrap_err();
    assert!(matches!(err, AcceptError::RepostFailed { .. }));
    assert_eq!(acceptor.state(), AcceptState::Stalled);

    acceptor.arm().unwrap();
    assert_eq!(acceptor.state(), AcceptState::AcceptPosted);
    assert_eq!(submitter.submitted(), 2);
}

#[test]
fn shutdown_cancels_once_and_drains_late_completions() {
    let submitter = ScriptedSubmitter::default();
    let mut acceptor = CompletionAcceptor::new(submitter.clone());
    acceptor.arm().unwrap();

    acceptor.shutdown();
    acceptor.shutdown();
    assert_eq!(submitter.cancelled(), 1);
    assert_eq!(acceptor.state(), AcceptState::Stopped);

    let (connection, _client) = accepted_connection();
    let harvest = acceptor.harvest(completed(connection));
    assert!(harvest.is_empty());
    assert_eq!(submitter.submitted(), 1);
    assert!(acceptor.arm().is_err());
}

#[test]
fn readiness_signal_is_ignored() {
    let submitter = ScriptedSubmitter::default();
    let mut acceptor = CompletionAcceptor::new(submitter.clone());
    acceptor.arm().unwrap();

    assert!(acceptor.harvest(AcceptSignal::Ready).is_empty());
    assert_eq!(acceptor.completed(), 0);
    assert_eq!(submitter.submitted(), 1);
}
