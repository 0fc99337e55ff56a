use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use braid_core::async_trait;
use braid_core::context::CallContext;
use braid_core::contract::{ByteStream, MessageStream, SockObject};
use braid_core::error::{CoreError, ErrorKind, Result, not_supported, pipe_error};
use braid_core::handle::{self, Handle};
use braid_core::iol::{RecvCursor, RecvSeg, recv_capacity, total_len};
use braid_core::state::HalfState;

mod ops {
    pub const ATTACH: &str = "pfx.attach";
    pub const DETACH: &str = "pfx.detach";
    pub const SEND: &str = "pfx.send";
    pub const RECV: &str = "pfx.recv";
    pub const DONE: &str = "pfx.done";
}

/// 终止标记：不是合法长度的保留值。
const TERMINATOR: u64 = u64::MAX;

/// 长度前缀分帧对象。
///
/// 持有下层句柄的独占所有权，并缓存下层对象以免每次操作都查句柄表。
/// `released` 置位表示所有权已在 `detach` 中交还，析构不再关闭下层。
pub(crate) struct PfxStream {
    lower: Handle,
    lower_obj: Arc<dyn SockObject>,
    tx: AsyncMutex<HalfState>,
    rx: AsyncMutex<HalfState>,
    released: AtomicBool,
}

impl PfxStream {
    fn lower_bytestream(&self, op: &'static str) -> Result<&dyn ByteStream> {
        self.lower_obj.as_bytestream().ok_or_else(|| not_supported(op))
    }
}

impl Drop for PfxStream {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            handle::close(self.lower);
        }
    }
}

#[async_trait]
impl SockObject for PfxStream {
    fn kind(&self) -> &'static str {
        "pfx.stream"
    }

    fn as_message(&self) -> Option<&dyn MessageStream> {
        Some(self)
    }

    async fn done(&self, ctx: &CallContext) -> Result<()> {
        let mut tx = self.tx.lock().await;
        tx.check(ops::DONE)?;
        let header = TERMINATOR.to_be_bytes();
        match self.lower_bytestream(ops::DONE)?.send_vectored(&[&header], ctx).await {
            Ok(()) => {
                tx.set_done();
                Ok(())
            }
            Err(err) => {
                tx.poison();
                Err(err)
            }
        }
    }
}

#[async_trait]
impl MessageStream for PfxStream {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
        let mut tx = self.tx.lock().await;
        tx.check(ops::SEND)?;
        let header = (total_len(segs) as u64).to_be_bytes();
        let mut list: Vec<&[u8]> = Vec::with_capacity(segs.len() + 1);
        list.push(&header);
        list.extend_from_slice(segs);
        // 头部与负载在一次全量写里落盘，下层保证原子性。
        match self.lower_bytestream(ops::SEND)?.send_vectored(&list, ctx).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tx.poison();
                Err(err)
            }
        }
    }

    async fn recv_vectored(
        &self,
        segs: Option<&mut [RecvSeg<'_>]>,
        ctx: &CallContext,
    ) -> Result<usize> {
        let mut rx = self.rx.lock().await;
        rx.check(ops::RECV)?;
        let bs = self.lower_bytestream(ops::RECV)?;

        let mut header = [0u8; 8];
        if let Err(err) = bs.recv_vectored(&mut [RecvSeg::Buf(&mut header)], ctx).await {
            rx.poison();
            return Err(err);
        }
        let size = u64::from_be_bytes(header);
        if size == TERMINATOR {
            // 对端宣告流结束。
            rx.set_done();
            return Err(pipe_error(ops::RECV));
        }
        let Ok(size) = usize::try_from(size) else {
            rx.poison();
            return Err(CoreError::new(ErrorKind::MessageTooLarge, ops::RECV));
        };

        match segs {
            None => {
                if size > 0 {
                    if let Err(err) =
                        bs.recv_vectored(&mut [RecvSeg::Discard(size)], ctx).await
                    {
                        rx.poison();
                        return Err(err);
                    }
                }
            }
            Some(segs) => {
                if size > recv_capacity(segs) {
                    rx.poison();
                    return Err(CoreError::new(ErrorKind::MessageTooLarge, ops::RECV));
                }
                if size > 0 {
                    let mut cursor = RecvCursor::new(segs);
                    let mut view = cursor.take(size);
                    if let Err(err) = bs.recv_vectored(&mut view, ctx).await {
                        rx.poison();
                        return Err(err);
                    }
                }
            }
        }
        Ok(size)
    }
}

/// 在字节流句柄上叠放长度前缀分帧层。下层句柄被消费。
pub fn attach(lower: Handle) -> Result<Handle> {
    let lower_obj = handle::object(lower, ops::ATTACH)?;
    if lower_obj.as_bytestream().is_none() {
        return Err(not_supported(ops::ATTACH));
    }
    // 复制后关闭：调用方的句柄随即失效，所有权归本层。
    let private = handle::dup(lower)?;
    handle::close(lower);
    let h = handle::register(Arc::new(PfxStream {
        lower: private,
        lower_obj,
        tx: AsyncMutex::new(HalfState::new()),
        rx: AsyncMutex::new(HalfState::new()),
        released: AtomicBool::new(false),
    }));
    debug!(target: "braid::pfx", handle = %h, lower = %private, "attached");
    Ok(h)
}

/// 双向终止握手后交还下层句柄。
///
/// 尚未发出终止标记则先发出；随后丢弃入站消息直至观察到对端的终止
/// 标记。任何错误都把整个层连同下层强制关闭并上抛。
pub async fn detach(h: Handle, ctx: &CallContext) -> Result<Handle> {
    let stream = handle::control::<PfxStream>(h, ops::DETACH)?;
    let result = shutdown_handshake(stream.as_ref(), ctx).await;
    if result.is_ok() {
        stream.released.store(true, Ordering::SeqCst);
    }
    let lower = stream.lower;
    drop(stream);
    handle::close(h);
    debug!(target: "braid::pfx", handle = %h, ok = result.is_ok(), "detached");
    result.map(|()| lower)
}

async fn shutdown_handshake(stream: &PfxStream, ctx: &CallContext) -> Result<()> {
    match SockObject::done(stream, ctx).await {
        Ok(()) => {}
        // 调用方已经通过 `done` 发过终止标记。
        Err(err) if err.kind() == ErrorKind::Pipe => {}
        Err(err) => return Err(err),
    }
    // 丢弃入站消息，直到观察到对端的终止标记。
    loop {
        match MessageStream::recv_vectored(stream, None, ctx).await {
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::Pipe => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}
