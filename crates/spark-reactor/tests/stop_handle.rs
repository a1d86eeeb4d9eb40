//! 跨线程停止请求的契约测试。
//!
//! - **Why**：信号处理线程只能通过 `StopHandle` 置位标志并唤醒轮询器，不能触碰注册表；
//!   若唤醒丢失，`run()` 将永远阻塞。
//! - **How**：在辅助线程中延迟发出停止请求，主线程阻塞在 `run()` 上。
//! - **What**：`run()` 必须返回 `Ok(())`，且登记数量不受停止请求影响。

#![cfg(unix)]

use spark_reactor::EventLoop;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;
use tracing_test::traced_test;

#[test]
fn stop_from_another_thread_unblocks_run() {
    let event_loop = EventLoop::new().expect("event loop");
    let (reader, _writer) = UnixStream::pair().expect("socket pair");
    let registration = event_loop
        .register(reader.as_raw_fd(), || {})
        .expect("register");

    let stop = event_loop.stop_handle();
    let helper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stop.request_stop().expect("request stop");
    });

    event_loop.run().expect("run");
    helper.join().expect("join helper");

    assert_eq!(event_loop.registration_count(), 1);
    event_loop.deregister(&registration).expect("deregister");
}

/// 停止标志在 `run()` 返回时被消费，反应器可以再次运行并再次停止。
#[traced_test]
#[test]
fn loop_can_run_again_after_stop() {
    let event_loop = EventLoop::new().expect("event loop");
    for _ in 0..2 {
        let stop = event_loop.stop_handle();
        let helper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stop.request_stop().expect("request stop");
        });
        event_loop.run().expect("run");
        helper.join().expect("join helper");
    }
    assert!(logs_contain("event loop stopped"));
}
