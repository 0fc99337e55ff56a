use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use braid_core::async_trait;
use braid_core::context::{CallContext, run_with_context};
use braid_core::contract::{ByteStream, SockObject};
use braid_core::error::{CoreError, ErrorKind, Result, map_io_error};
use braid_core::handle::{self, Handle};
use braid_core::iol::RecvSeg;
use braid_transport::{StreamConfig, StreamRx, StreamTx};

pub(crate) mod ops {
    pub const CONNECT: &str = "tcp.connect";
    pub const ATTACH: &str = "tcp.attach";
    pub const DETACH: &str = "tcp.detach";
    pub const STOP: &str = "tcp.stop";
    pub const SEND: &str = "tcp.send";
    pub const RECV: &str = "tcp.recv";
    pub const DONE: &str = "tcp.done";
    pub const ADDR: &str = "tcp.addr";
}

/// TCP 连接对象：句柄表中的字节流能力提供者。
///
/// 读写半部各自持锁，同方向调用 FIFO，两个方向互不阻塞；`done` 即
/// `shutdown(Write)`，发出 FIN 并把发送方向标记为已结束。
pub(crate) struct TcpChannel {
    tx: AsyncMutex<StreamTx<OwnedWriteHalf>>,
    rx: AsyncMutex<StreamRx<OwnedReadHalf>>,
    pub(crate) local: SocketAddr,
    pub(crate) peer: SocketAddr,
}

#[async_trait]
impl SockObject for TcpChannel {
    fn kind(&self) -> &'static str {
        "tcp.channel"
    }

    fn as_bytestream(&self) -> Option<&dyn ByteStream> {
        Some(self)
    }

    async fn done(&self, ctx: &CallContext) -> Result<()> {
        self.tx.lock().await.shutdown(ctx, ops::DONE).await
    }
}

#[async_trait]
impl ByteStream for TcpChannel {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
        self.tx.lock().await.send(segs, ctx, ops::SEND).await
    }

    async fn recv_vectored(&self, segs: &mut [RecvSeg<'_>], ctx: &CallContext) -> Result<()> {
        self.rx.lock().await.recv(segs, ctx, ops::RECV).await
    }
}

pub(crate) fn register_stream(
    stream: TcpStream,
    config: &StreamConfig,
    op: &'static str,
) -> Result<Handle> {
    braid_transport::tune::tune_stream(&stream).map_err(|err| map_io_error(op, err))?;
    let local = stream.local_addr().map_err(|err| map_io_error(op, err))?;
    let peer = stream.peer_addr().map_err(|err| map_io_error(op, err))?;
    let (reader, writer) = stream.into_split();
    let channel = Arc::new(TcpChannel {
        tx: AsyncMutex::new(StreamTx::new(writer)),
        rx: AsyncMutex::new(StreamRx::new(reader, config.staging_capacity())),
        local,
        peer,
    });
    let h = handle::register(channel);
    debug!(target: "braid::tcp", handle = %h, %local, %peer, "stream ready");
    Ok(h)
}

/// 建连到远端地址，继承上下文的取消与截止语义。
pub async fn connect(addr: SocketAddr, ctx: &CallContext) -> Result<Handle> {
    connect_with_config(addr, ctx, &StreamConfig::default()).await
}

/// 按给定配置建连。
pub async fn connect_with_config(
    addr: SocketAddr,
    ctx: &CallContext,
    config: &StreamConfig,
) -> Result<Handle> {
    let stream = run_with_context(ctx, ops::CONNECT, TcpStream::connect(addr)).await?;
    register_stream(stream, config, ops::CONNECT)
}

/// 接管一条既有的标准库 TCP 连接。
pub fn attach(stream: std::net::TcpStream) -> Result<Handle> {
    attach_with_config(stream, &StreamConfig::default())
}

/// 按给定配置接管既有连接。
pub fn attach_with_config(stream: std::net::TcpStream, config: &StreamConfig) -> Result<Handle> {
    stream.set_nonblocking(true).map_err(|err| map_io_error(ops::ATTACH, err))?;
    let stream = TcpStream::from_std(stream).map_err(|err| map_io_error(ops::ATTACH, err))?;
    register_stream(stream, config, ops::ATTACH)
}

/// 拆解句柄，交还裸的标准库连接。
///
/// 句柄被消费；存在 `dup` 副本或读写仍在进行时拒绝。
pub fn detach(h: Handle) -> Result<std::net::TcpStream> {
    let channel = handle::control::<TcpChannel>(h, ops::DETACH)?;
    handle::close(h);
    let channel = Arc::try_unwrap(channel)
        .map_err(|_| CoreError::new(ErrorKind::InvalidInput, ops::DETACH))?;
    let reader = channel.rx.into_inner().into_inner();
    let writer = channel.tx.into_inner().into_inner();
    let stream = reader
        .reunite(writer)
        .map_err(|_| CoreError::new(ErrorKind::InvalidInput, ops::DETACH))?;
    stream.into_std().map_err(|err| map_io_error(ops::DETACH, err))
}

/// 优雅终止：半关闭、排空对端数据直至其 EOF，然后关闭句柄。
///
/// 无论成败句柄都会被关闭；失败时返回导致终止失败的错误。
pub async fn stop(h: Handle, ctx: &CallContext) -> Result<()> {
    let channel = handle::control::<TcpChannel>(h, ops::STOP)?;
    let result = braid_transport::stream::graceful_stop(channel.as_ref(), ctx).await;
    handle::close(h);
    result
}

/// 本地地址：连接与监听句柄皆可。
pub fn local_addr(h: Handle) -> Result<SocketAddr> {
    if let Ok(channel) = handle::control::<TcpChannel>(h, ops::ADDR) {
        return Ok(channel.local);
    }
    let listener = handle::control::<crate::listener::TcpListenerObject>(h, ops::ADDR)?;
    Ok(listener.local)
}

/// 对端地址。
pub fn peer_addr(h: Handle) -> Result<SocketAddr> {
    Ok(handle::control::<TcpChannel>(h, ops::ADDR)?.peer)
}
