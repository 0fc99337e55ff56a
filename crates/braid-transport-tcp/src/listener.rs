use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener as TokioTcpListener;
use tracing::debug;

use braid_core::context::{CallContext, run_with_context};
use braid_core::contract::SockObject;
use braid_core::error::{Result, map_io_error};
use braid_core::handle::{self, Handle};
use braid_transport::StreamConfig;
use braid_transport::tune;

use crate::channel;

mod ops {
    pub const LISTEN: &str = "tcp.listen";
    pub const ACCEPT: &str = "tcp.accept";
}

/// TCP 监听对象：不暴露数据接口，仅供 `accept` 与地址查询使用。
///
/// 接受的连接继承监听时的 [`StreamConfig`]。
pub(crate) struct TcpListenerObject {
    inner: TokioTcpListener,
    pub(crate) local: SocketAddr,
    config: StreamConfig,
}

impl SockObject for TcpListenerObject {
    fn kind(&self) -> &'static str {
        "tcp.listener"
    }
}

/// 监听给定地址。端口为 0 时由内核分配，可用
/// [`crate::local_addr`] 读回实际端口。
pub fn listen(addr: SocketAddr, backlog: u32) -> Result<Handle> {
    listen_with_config(addr, backlog, &StreamConfig::default())
}

/// 按给定配置监听。
pub fn listen_with_config(addr: SocketAddr, backlog: u32, config: &StreamConfig) -> Result<Handle> {
    let std_listener =
        tune::bind_tcp_listener(addr, backlog, config).map_err(|err| map_io_error(ops::LISTEN, err))?;
    let listener =
        TokioTcpListener::from_std(std_listener).map_err(|err| map_io_error(ops::LISTEN, err))?;
    let local = listener.local_addr().map_err(|err| map_io_error(ops::LISTEN, err))?;
    let h = handle::register(Arc::new(TcpListenerObject {
        inner: listener,
        local,
        config: config.clone(),
    }));
    debug!(target: "braid::tcp", handle = %h, %local, backlog, "listening");
    Ok(h)
}

/// 接受一个入站连接，返回连接句柄与对端地址。
pub async fn accept(h: Handle, ctx: &CallContext) -> Result<(Handle, SocketAddr)> {
    let listener = handle::control::<TcpListenerObject>(h, ops::ACCEPT)?;
    let (stream, peer) = run_with_context(ctx, ops::ACCEPT, listener.inner.accept()).await?;
    let conn = channel::register_stream(stream, &listener.config, ops::ACCEPT)?;
    Ok((conn, peer))
}
