//! `spark-echo`：把 accept 引擎与 netlink 监视器串起来的回显演示程序。
//!
//! # 设计动机（Why）
//! - 让反应器、accept 引擎与 netlink 监视器在同一个单线程循环里端到端运行；
//! - 反应器由 `main` 构造一次，再以引用传给每个组件，不存在进程级单例。
//!
//! # 使用契约（What）
//! - `spark-echo <port | unix-socket-path>`：数字按 TCP 端口监听（backlog 1），否则视为 Unix 域路径；
//! - 不带参数时打印用法并以零状态码退出；
//! - SIGINT/SIGTERM 触发停止，反应器在下一次唤醒时退出循环。
//!
//! # 风险提示（Trade-offs & Gotchas）
//! - 回显写入是非阻塞的，没有写缓冲；对端长期不读取导致发送缓冲写满时，连接被直接关闭，仅适合演示。

use spark_reactor::{EventLoop, Registration, StopHandle};
use spark_transport_tcp::{ClientConnection, TcpServer};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::process::ExitCode;
use std::rc::Rc;
use std::thread;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: spark-echo <port | unix-socket-path>";

/// 正在回显的客户端，按反应器句柄索引。
type Clients = Rc<RefCell<HashMap<spark_reactor::RawHandle, Client>>>;

struct Client {
    connection: ClientConnection,
    registration: Option<Registration>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(target) = std::env::args().nth(1) else {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    };
    match run(&target) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "spark-echo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(target: &str) -> Result<(), Box<dyn std::error::Error>> {
    let event_loop = EventLoop::new()?;
    install_signal_handler(event_loop.stop_handle())?;

    #[cfg(target_os = "linux")]
    let _monitor = start_netlink_monitor(&event_loop);

    let clients: Clients = Rc::default();
    let server = TcpServer::new(&event_loop);
    server.on_fault(|fault| {
        error!(code = fault.code(), error = %fault, "accept engine stalled");
    });
    let on_accept = {
        let event_loop = event_loop.clone();
        let clients = clients.clone();
        move |connection| attach_client(&event_loop, &clients, connection)
    };
    start_server(&server, target, on_accept)?;

    event_loop.run()?;

    server.stop();
    for (_, client) in clients.borrow_mut().drain() {
        if let Some(registration) = client.registration {
            // 循环已退出，注销失败也不影响进程结束
            let _ = event_loop.deregister(&registration);
        }
    }
    info!("spark-echo stopped");
    Ok(())
}

fn start_server<F>(
    server: &TcpServer,
    target: &str,
    on_accept: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnMut(ClientConnection) + 'static,
{
    if let Ok(port) = target.parse::<u16>() {
        server.start(port, 1, on_accept)?;
        return Ok(());
    }
    #[cfg(unix)]
    {
        server.start_unix(spark_transport_tcp::UnixServerConfig::new(target), on_accept)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        drop(on_accept);
        Err(format!("unix domain sockets are not supported on this platform: {target}").into())
    }
}

/// 信号在辅助线程上同步接收，只通过 [`StopHandle`] 与反应器交互。
fn install_signal_handler(stop: StopHandle) -> io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("spark-echo-signals".into())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "stop requested");
                if let Err(err) = stop.request_stop() {
                    warn!(error = %err, "stop request failed");
                }
            }
        })?;
    Ok(())
}

fn attach_client(event_loop: &EventLoop, clients: &Clients, connection: ClientConnection) {
    let handle = connection.raw_handle();
    info!(peer = ?connection.peer_addr(), "client connected");
    let on_ready = {
        let event_loop = event_loop.clone();
        let clients = clients.clone();
        move || echo(&event_loop, &clients, handle)
    };
    clients.borrow_mut().insert(
        handle,
        Client {
            connection,
            registration: None,
        },
    );
    match event_loop.register(handle, on_ready) {
        Ok(registration) => {
            if let Some(client) = clients.borrow_mut().get_mut(&handle) {
                client.registration = Some(registration);
            }
        }
        Err(err) => {
            warn!(error = %err, "client registration failed, closing");
            clients.borrow_mut().remove(&handle);
        }
    }
}

/// 读到的字节原样写回；对端关闭、发送缓冲写满或出错时注销并关闭连接。
fn echo(event_loop: &EventLoop, clients: &Clients, handle: spark_reactor::RawHandle) {
    let mut buf = [0u8; 4096];
    let closed = {
        let mut clients = clients.borrow_mut();
        let Some(client) = clients.get_mut(&handle) else {
            return;
        };
        loop {
            match client.connection.read(&mut buf) {
                Ok(0) => break true,
                Ok(n) => {
                    match client.connection.write_all(&buf[..n]) {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::WouldBlock => {
                            info!("peer is not reading, send buffer full, closing");
                            break true;
                        }
                        Err(err) => {
                            debug!(error = %err, "echo write failed");
                            break true;
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break false,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(error = %err, "echo read failed");
                    break true;
                }
            }
        }
    };
    if closed {
        let removed = clients.borrow_mut().remove(&handle);
        if let Some(Client {
            registration: Some(registration),
            ..
        }) = removed
            && let Err(err) = event_loop.deregister(&registration)
        {
            warn!(error = %err, "client deregistration failed");
        }
        info!("client disconnected");
    }
}

#[cfg(target_os = "linux")]
fn start_netlink_monitor(event_loop: &EventLoop) -> Option<spark_netlink::NetlinkMonitor> {
    use spark_netlink::{NetadapterList, NetlinkConfig, NetlinkMonitor};

    let cache = NetadapterList::new();
    let monitor = match NetlinkMonitor::new(event_loop, cache, NetlinkConfig::new()) {
        Ok(monitor) => monitor,
        Err(err) => {
            warn!(code = err.code(), error = %err, "netlink monitor unavailable");
            return None;
        }
    };
    let started = monitor.start(|event| {
        info!(
            kind = event.kind.as_str(),
            interface_index = event.interface_index,
            address = %event.address_text(),
            "interface event"
        );
    });
    match started {
        Ok(()) => Some(monitor),
        Err(err) => {
            warn!(code = err.code(), error = %err, "netlink monitor failed to start");
            None
        }
    }
}
