//! 平台原生句柄类型别名。

/// 可交给反应器登记的原生句柄：Unix 上为文件描述符，Windows 上为套接字。
#[cfg(unix)]
pub type RawHandle = std::os::fd::RawFd;

/// 可交给反应器登记的原生句柄：Unix 上为文件描述符，Windows 上为套接字。
#[cfg(windows)]
pub type RawHandle = std::os::windows::io::RawSocket;
