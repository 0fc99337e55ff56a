//! 套接字构造与调优：显式 backlog、`SO_REUSEADDR`、非阻塞模式，以及
//! Apple 平台上的 `SO_NOSIGPIPE`。

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Socket, Type};

use crate::stream::DEFAULT_STAGING_CAPACITY;

/// 流式传输的构造参数。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“暂存缓冲多大、要不要 `SO_REUSEADDR`”这类介质无关的旋钮集中
///   建模，避免各传输 crate 散布裸常量；
/// - 为未来扩展更多套接字选项保留统一入口。
///
/// ## 契约（What）
/// - `staging_capacity`：接收暂存缓冲容量，必须非零；
/// - `reuse_address`：监听与连接套接字是否设置 `SO_REUSEADDR`，默认开，
///   便于测试快速复用本地地址。
#[derive(Clone, Debug)]
pub struct StreamConfig {
    staging_capacity: usize,
    reuse_address: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { staging_capacity: DEFAULT_STAGING_CAPACITY, reuse_address: true }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置接收暂存缓冲容量。
    pub fn with_staging_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "staging capacity must be non-zero");
        self.staging_capacity = capacity;
        self
    }

    pub fn staging_capacity(&self) -> usize {
        self.staging_capacity
    }

    pub fn with_reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    pub fn reuse_address(&self) -> bool {
        self.reuse_address
    }
}

/// 构造 TCP 监听套接字：非阻塞、按配置复用地址、显式 backlog。
pub fn bind_tcp_listener(
    addr: SocketAddr,
    backlog: u32,
    config: &StreamConfig,
) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    if config.reuse_address() {
        socket.set_reuse_address(true)?;
    }
    nosigpipe(&socket)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;
    Ok(socket.into())
}

/// 构造 UNIX 监听套接字：非阻塞、显式 backlog。
#[cfg(unix)]
pub fn bind_unix_listener(
    addr: &socket2::SockAddr,
    backlog: u32,
) -> io::Result<std::os::unix::net::UnixListener> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.bind(addr)?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;
    Ok(socket.into())
}

/// 对已建立的连接套接字做调优：快速复用本地地址，并在支持的平台上
/// 抑制 `SIGPIPE`。
#[cfg(unix)]
pub fn tune_stream<S: std::os::fd::AsFd>(stream: &S) -> io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    sock.set_reuse_address(true)?;
    nosigpipe_ref(&sock)
}

fn nosigpipe(socket: &Socket) -> io::Result<()> {
    #[cfg(target_vendor = "apple")]
    socket.set_nosigpipe(true)?;
    let _ = socket;
    Ok(())
}

#[cfg(unix)]
fn nosigpipe_ref(sock: &socket2::SockRef<'_>) -> io::Result<()> {
    #[cfg(target_vendor = "apple")]
    sock.set_nosigpipe(true)?;
    let _ = sock;
    Ok(())
}
