//! 就绪模型后端的回环测试：真实监听套接字 + 真实反应器，以 `run_once` 逐轮驱动。

use spark_reactor::EventLoop;
use socket2::SockRef;
use spark_transport_tcp::{
    AcceptError, AcceptState, ClientConnection, TcpServer, TcpServerConfig, TcpSocketConfig,
};
use std::cell::RefCell;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::time::Duration;

fn loopback(port: u16) -> TcpServerConfig {
    TcpServerConfig::new(port, 8).with_bind_address("127.0.0.1".parse().unwrap())
}

fn listening_addr(server: &TcpServer) -> SocketAddr {
    server
        .local_addr()
        .and_then(|address| address.as_socket_addr())
        .expect("tcp listen address")
}

/// 驱动反应器直到 `done` 为真或轮数耗尽。
fn drive_until(event_loop: &EventLoop, mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        event_loop
            .run_once(Some(Duration::from_millis(10)))
            .expect("run once");
    }
    assert!(done(), "condition not reached while driving the event loop");
}

#[test]
fn accepted_connection_is_handed_to_callback() {
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    let accepted: Rc<RefCell<Vec<ClientConnection>>> = Rc::default();
    let sink = accepted.clone();
    server
        .start_with_config(loopback(0), move |connection| {
            sink.borrow_mut().push(connection)
        })
        .expect("start");
    assert_eq!(server.state(), AcceptState::AcceptPosted);

    let mut client = TcpStream::connect(listening_addr(&server)).expect("connect");
    drive_until(&event_loop, || accepted.borrow().len() == 1);

    let mut connection = accepted.borrow_mut().pop().expect("connection");
    assert_eq!(connection.peer_addr(), Some(client.local_addr().unwrap()));

    client.write_all(b"hello").unwrap();
    let mut buf = [0u8; 5];
    let mut read = 0;
    for _ in 0..200 {
        match connection.read(&mut buf[read..]) {
            Ok(n) => {
                read += n;
                if read == buf.len() {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5))
            }
            Err(err) => panic!("read failed: {err}"),
        }
    }
    assert_eq!(&buf, b"hello");
}

#[test]
fn each_queued_connection_yields_one_callback() {
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    let count = Rc::new(RefCell::new(0usize));
    let counter = count.clone();
    server
        .start_with_config(loopback(0), move |_| *counter.borrow_mut() += 1)
        .expect("start");
    let addr = listening_addr(&server);

    let _clients: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(addr).expect("connect"))
        .collect();
    drive_until(&event_loop, || *count.borrow() == 3);

    assert_eq!(server.state(), AcceptState::AcceptPosted);
}

/// 接受一条连接并取回其 `TcpStream`，用于读取套接字选项。
fn accept_one(config: TcpServerConfig) -> (TcpStream, TcpStream) {
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    let accepted: Rc<RefCell<Vec<ClientConnection>>> = Rc::default();
    let sink = accepted.clone();
    server
        .start_with_config(config, move |connection| sink.borrow_mut().push(connection))
        .expect("start");
    let client = TcpStream::connect(listening_addr(&server)).expect("connect");
    drive_until(&event_loop, || accepted.borrow().len() == 1);
    let connection = accepted.borrow_mut().pop().expect("connection");
    let stream = connection.into_tcp_stream().expect("tcp connection");
    (stream, client)
}

#[test]
fn socket_options_are_applied_to_accepted_connections() {
    let options = TcpSocketConfig::new()
        .with_linger(Some(Duration::from_secs(3)))
        .with_nodelay(true);
    let (stream, _client) = accept_one(loopback(0).with_socket_config(options));

    assert!(stream.nodelay().unwrap());
    assert_eq!(
        SockRef::from(&stream).linger().unwrap(),
        Some(Duration::from_secs(3))
    );
}

#[test]
fn default_socket_options_leave_kernel_defaults() {
    let (stream, _client) = accept_one(loopback(0));

    assert!(!stream.nodelay().unwrap());
    assert_eq!(SockRef::from(&stream).linger().unwrap(), None);
}

#[test]
fn stop_is_idempotent_and_releases_the_port() {
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    server.start_with_config(loopback(0), |_| {}).expect("start");
    let addr = listening_addr(&server);
    assert_eq!(event_loop.registration_count(), 1);

    server.stop();
    server.stop();

    assert_eq!(event_loop.registration_count(), 0);
    assert_eq!(server.state(), AcceptState::Stopped);
    assert!(server.local_addr().is_none());
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn second_start_is_rejected_until_stopped() {
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    server.start_with_config(loopback(0), |_| {}).expect("start");

    let err = server
        .start_with_config(loopback(0), |_| {})
        .unwrap_err();
    assert!(matches!(err, AcceptError::AlreadyStarted));

    server.stop();
    server
        .start_with_config(loopback(0), |_| {})
        .expect("restart after stop");
    assert_eq!(server.state(), AcceptState::AcceptPosted);
}

#[test]
fn bind_conflict_is_reported_as_status() {
    let event_loop = EventLoop::new().expect("event loop");
    let first = TcpServer::new(&event_loop);
    first.start_with_config(loopback(0), |_| {}).expect("start");
    let port = listening_addr(&first).port();

    let second = TcpServer::new(&event_loop);
    let err = second
        .start_with_config(loopback(port).with_reuse_address(false), |_| {})
        .unwrap_err();

    assert_eq!(err.code(), "spark.transport.tcp.bind_failed");
    assert_eq!(second.state(), AcceptState::Idle);
    assert_eq!(event_loop.registration_count(), 1);
}

#[test]
fn dropping_the_server_deregisters() {
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    server.start_with_config(loopback(0), |_| {}).expect("start");

    drop(server);

    assert_eq!(event_loop.registration_count(), 0);
}

#[test]
fn readiness_server_ignores_rearm_while_listening() {
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    server.start_with_config(loopback(0), |_| {}).expect("start");

    server.rearm().expect("rearm is a no-op while listening");

    assert_eq!(server.state(), AcceptState::AcceptPosted);
}

#[cfg(not(all(target_os = "linux", feature = "io-uring")))]
#[test]
fn completion_backend_requires_the_io_uring_feature() {
    use spark_transport_tcp::AcceptBackendKind;

    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);

    let err = server
        .start_with_config(
            loopback(0).with_backend(AcceptBackendKind::Completion),
            |_| {},
        )
        .unwrap_err();

    assert!(matches!(err, AcceptError::Unsupported(_)));
    assert_eq!(server.state(), AcceptState::Idle);
}

