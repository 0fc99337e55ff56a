use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
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
    pub const CONNECT: &str = "uds.connect";
    pub const PAIR: &str = "uds.pair";
    pub const ATTACH: &str = "uds.attach";
    pub const DETACH: &str = "uds.detach";
    pub const STOP: &str = "uds.stop";
    pub const SEND: &str = "uds.send";
    pub const RECV: &str = "uds.recv";
    pub const DONE: &str = "uds.done";
}

/// UNIX 域流式连接对象。读写半部各自持锁；`done` 即写侧 `shutdown`。
pub(crate) struct UdsChannel {
    tx: AsyncMutex<StreamTx<OwnedWriteHalf>>,
    rx: AsyncMutex<StreamRx<OwnedReadHalf>>,
}

#[async_trait]
impl SockObject for UdsChannel {
    fn kind(&self) -> &'static str {
        "uds.channel"
    }

    fn as_bytestream(&self) -> Option<&dyn ByteStream> {
        Some(self)
    }

    async fn done(&self, ctx: &CallContext) -> Result<()> {
        self.tx.lock().await.shutdown(ctx, ops::DONE).await
    }
}

#[async_trait]
impl ByteStream for UdsChannel {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
        self.tx.lock().await.send(segs, ctx, ops::SEND).await
    }

    async fn recv_vectored(&self, segs: &mut [RecvSeg<'_>], ctx: &CallContext) -> Result<()> {
        self.rx.lock().await.recv(segs, ctx, ops::RECV).await
    }
}

pub(crate) fn register_stream(
    stream: UnixStream,
    config: &StreamConfig,
    op: &'static str,
) -> Result<Handle> {
    braid_transport::tune::tune_stream(&stream).map_err(|err| map_io_error(op, err))?;
    let (reader, writer) = stream.into_split();
    let channel = Arc::new(UdsChannel {
        tx: AsyncMutex::new(StreamTx::new(writer)),
        rx: AsyncMutex::new(StreamRx::new(reader, config.staging_capacity())),
    });
    let h = handle::register(channel);
    debug!(target: "braid::uds", handle = %h, "stream ready");
    Ok(h)
}

/// 把路径翻译为套接字地址；超出 `sun_path` 上限报 `NameTooLong`。
pub(crate) fn resolve(path: &Path, op: &'static str) -> Result<socket2::SockAddr> {
    socket2::SockAddr::unix(path).map_err(|_| CoreError::new(ErrorKind::NameTooLong, op))
}

/// 建连到监听路径。
pub async fn connect(path: impl AsRef<Path>, ctx: &CallContext) -> Result<Handle> {
    connect_with_config(path, ctx, &StreamConfig::default()).await
}

/// 按给定配置建连。
pub async fn connect_with_config(
    path: impl AsRef<Path>,
    ctx: &CallContext,
    config: &StreamConfig,
) -> Result<Handle> {
    let path = path.as_ref();
    resolve(path, ops::CONNECT)?;
    let stream = run_with_context(ctx, ops::CONNECT, UnixStream::connect(path)).await?;
    register_stream(stream, config, ops::CONNECT)
}

/// 进程内的连通套接字对。
pub fn pair() -> Result<(Handle, Handle)> {
    let (a, b) = UnixStream::pair().map_err(|err| map_io_error(ops::PAIR, err))?;
    let config = StreamConfig::default();
    let ha = register_stream(a, &config, ops::PAIR)?;
    let hb = register_stream(b, &config, ops::PAIR)?;
    Ok((ha, hb))
}

/// 接管一条既有的标准库 UNIX 流连接。
pub fn attach(stream: std::os::unix::net::UnixStream) -> Result<Handle> {
    attach_with_config(stream, &StreamConfig::default())
}

/// 按给定配置接管既有连接。
pub fn attach_with_config(
    stream: std::os::unix::net::UnixStream,
    config: &StreamConfig,
) -> Result<Handle> {
    stream.set_nonblocking(true).map_err(|err| map_io_error(ops::ATTACH, err))?;
    let stream = UnixStream::from_std(stream).map_err(|err| map_io_error(ops::ATTACH, err))?;
    register_stream(stream, config, ops::ATTACH)
}

/// 拆解句柄，交还裸的标准库连接。句柄被消费。
pub fn detach(h: Handle) -> Result<std::os::unix::net::UnixStream> {
    let channel = handle::control::<UdsChannel>(h, ops::DETACH)?;
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
pub async fn stop(h: Handle, ctx: &CallContext) -> Result<()> {
    let channel = handle::control::<UdsChannel>(h, ops::STOP)?;
    let result = braid_transport::stream::graceful_stop(channel.as_ref(), ctx).await;
    handle::close(h);
    result
}
