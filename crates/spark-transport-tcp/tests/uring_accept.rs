//! 完成模型后端的内核集成测试；内核不支持 io_uring 时跳过。

#![cfg(all(target_os = "linux", feature = "io-uring"))]

use spark_reactor::EventLoop;
use spark_transport_tcp::{
    AcceptBackendKind, AcceptError, AcceptState, ClientConnection, TcpServer, TcpServerConfig,
};
use std::cell::RefCell;
use std::net::TcpStream;
use std::rc::Rc;
use std::time::Duration;

fn completion_config() -> TcpServerConfig {
    TcpServerConfig::new(0, 8)
        .with_bind_address("127.0.0.1".parse().unwrap())
        .with_backend(AcceptBackendKind::Completion)
}

fn drive(event_loop: &EventLoop, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        event_loop
            .run_once(Some(Duration::from_millis(10)))
            .expect("run once");
    }
    done()
}

#[test]
fn completion_backend_accepts_and_reposts() {
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    let accepted: Rc<RefCell<Vec<ClientConnection>>> = Rc::default();
    let sink = accepted.clone();
    match server.start_with_config(completion_config(), move |connection| {
        sink.borrow_mut().push(connection)
    }) {
        Ok(()) => {}
        Err(AcceptError::Register(err)) => {
            eprintln!("io_uring unavailable, skipping: {err}");
            return;
        }
        Err(err) => panic!("start failed: {err}"),
    }
    let addr = server
        .local_addr()
        .and_then(|address| address.as_socket_addr())
        .expect("tcp address");

    let _first = TcpStream::connect(addr).expect("connect");
    let _second = TcpStream::connect(addr).expect("connect");
    assert!(drive(&event_loop, || accepted.borrow().len() == 2));
    assert_eq!(server.state(), AcceptState::AcceptPosted);

    server.stop();
    assert_eq!(server.state(), AcceptState::Stopped);
    // 被取消请求的完成在后续轮次中排空
    drive(&event_loop, || false);
    assert_eq!(accepted.borrow().len(), 2);
}
