//! Unix 域监听：文件系统路径与 Linux 抽象命名空间。

#![cfg(unix)]

use spark_reactor::EventLoop;
use spark_transport_tcp::{ClientConnection, ListenAddress, TcpServer, UnixServerConfig};
use std::cell::RefCell;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("spark-{}-{name}.sock", std::process::id()))
}

fn drive(event_loop: &EventLoop, mut done: impl FnMut() -> bool) {
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
fn filesystem_socket_accepts_and_is_removed_on_stop() {
    let path = socket_path("fs");
    let _ = std::fs::remove_file(&path);
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    let accepted: Rc<RefCell<Vec<ClientConnection>>> = Rc::default();
    let sink = accepted.clone();
    server
        .start_unix(UnixServerConfig::new(&path), move |connection| {
            sink.borrow_mut().push(connection)
        })
        .expect("start unix");
    assert_eq!(
        server.local_addr(),
        Some(ListenAddress::Unix {
            path: path.clone(),
            abstract_namespace: false,
        })
    );

    let _client = UnixStream::connect(&path).expect("connect");
    drive(&event_loop, || accepted.borrow().len() == 1);
    let connection = accepted.borrow_mut().pop().expect("connection");
    assert!(connection.is_unix());
    assert_eq!(connection.peer_addr(), None);

    server.stop();
    assert!(!path.exists());
}

#[cfg(target_os = "linux")]
#[test]
fn abstract_socket_leaves_no_filesystem_node() {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let name = format!("spark-abstract-{}", std::process::id());
    let event_loop = EventLoop::new().expect("event loop");
    let server = TcpServer::new(&event_loop);
    let count = Rc::new(RefCell::new(0usize));
    let counter = count.clone();
    server
        .start_unix(
            UnixServerConfig::new(&name).with_abstract_namespace(true),
            move |_| *counter.borrow_mut() += 1,
        )
        .expect("start abstract");
    assert_eq!(
        server.local_addr().map(|address| address.to_string()),
        Some(format!("@{name}"))
    );

    let address = SocketAddr::from_abstract_name(name.as_bytes()).unwrap();
    let _client = UnixStream::connect_addr(&address).expect("connect");
    drive(&event_loop, || *count.borrow() == 1);
    assert!(!PathBuf::from(&name).exists());
}
