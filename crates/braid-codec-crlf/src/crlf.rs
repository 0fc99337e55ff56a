use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use braid_core::async_trait;
use braid_core::context::CallContext;
use braid_core::contract::{ByteStream, MessageStream, SockObject};
use braid_core::error::{CoreError, ErrorKind, Result, not_supported, pipe_error};
use braid_core::handle::{self, Handle};
use braid_core::iol::{RecvSeg, total_len};
use braid_core::state::HalfState;

mod ops {
    pub const ATTACH: &str = "crlf.attach";
    pub const DETACH: &str = "crlf.detach";
    pub const SEND: &str = "crlf.send";
    pub const RECV: &str = "crlf.recv";
    pub const DONE: &str = "crlf.done";
}

const CRLF: &[u8] = b"\r\n";

/// CRLF 分帧对象。下层对象被缓存：接收端每字节都要经它转发。
pub(crate) struct CrlfStream {
    lower: Handle,
    lower_obj: Arc<dyn SockObject>,
    tx: AsyncMutex<HalfState>,
    rx: AsyncMutex<HalfState>,
    released: AtomicBool,
}

impl CrlfStream {
    fn lower_bytestream(&self, op: &'static str) -> Result<&dyn ByteStream> {
        self.lower_obj.as_bytestream().ok_or_else(|| not_supported(op))
    }
}

impl Drop for CrlfStream {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            handle::close(self.lower);
        }
    }
}

/// 已确认的负载字节写入目标；`None` 目标表示丢弃模式（容量无限）。
struct Sink<'a, 'b> {
    segs: Option<&'a mut [RecvSeg<'b>]>,
    idx: usize,
    off: usize,
}

impl Sink<'_, '_> {
    fn put(&mut self, byte: u8) -> bool {
        let Some(segs) = &mut self.segs else {
            return true;
        };
        while self.idx < segs.len() {
            let seg = &mut segs[self.idx];
            if self.off == seg.len() {
                self.idx += 1;
                self.off = 0;
                continue;
            }
            if let RecvSeg::Buf(buf) = seg {
                buf[self.off] = byte;
            }
            self.off += 1;
            return true;
        }
        false
    }
}

#[async_trait]
impl SockObject for CrlfStream {
    fn kind(&self) -> &'static str {
        "crlf.stream"
    }

    fn as_message(&self) -> Option<&dyn MessageStream> {
        Some(self)
    }

    async fn done(&self, ctx: &CallContext) -> Result<()> {
        let mut tx = self.tx.lock().await;
        tx.check(ops::DONE)?;
        match self.lower_bytestream(ops::DONE)?.send_vectored(&[CRLF], ctx).await {
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
impl MessageStream for CrlfStream {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
        let mut tx = self.tx.lock().await;
        tx.check(ops::SEND)?;
        // 负载不得包含 CRLF 序列（跨段检测）。
        let mut prev = 0u8;
        for seg in segs {
            for &byte in *seg {
                if prev == b'\r' && byte == b'\n' {
                    tx.poison();
                    return Err(CoreError::new(ErrorKind::InvalidInput, ops::SEND));
                }
                prev = byte;
            }
        }
        // 空行是协议终止标记，不能作为消息发送。
        if total_len(segs) == 0 {
            tx.poison();
            return Err(CoreError::new(ErrorKind::InvalidInput, ops::SEND));
        }
        let mut list: Vec<&[u8]> = Vec::with_capacity(segs.len() + 1);
        list.extend_from_slice(segs);
        list.push(CRLF);
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

        let mut sink = Sink { segs, idx: 0, off: 0 };
        // 待定字节：确认不属于终止序列后才写入，容量校验先于写入。
        let mut pending: Option<u8> = None;
        let mut count = 0usize;
        loop {
            let mut byte = [0u8; 1];
            if let Err(err) = bs.recv_vectored(&mut [RecvSeg::Buf(&mut byte)], ctx).await {
                rx.poison();
                return Err(err);
            }
            let cur = byte[0];
            if pending == Some(b'\r') && cur == b'\n' {
                break;
            }
            if let Some(prev) = pending {
                if !sink.put(prev) {
                    rx.poison();
                    return Err(CoreError::new(ErrorKind::MessageTooLarge, ops::RECV));
                }
                count += 1;
            }
            pending = Some(cur);
        }
        if count == 0 {
            // 空行：对端宣告流结束。
            rx.set_done();
            return Err(pipe_error(ops::RECV));
        }
        Ok(count)
    }
}

/// 在字节流句柄上叠放 CRLF 分帧层。下层句柄被消费。
pub fn attach(lower: Handle) -> Result<Handle> {
    let lower_obj = handle::object(lower, ops::ATTACH)?;
    if lower_obj.as_bytestream().is_none() {
        return Err(not_supported(ops::ATTACH));
    }
    let private = handle::dup(lower)?;
    handle::close(lower);
    let h = handle::register(Arc::new(CrlfStream {
        lower: private,
        lower_obj,
        tx: AsyncMutex::new(HalfState::new()),
        rx: AsyncMutex::new(HalfState::new()),
        released: AtomicBool::new(false),
    }));
    debug!(target: "braid::crlf", handle = %h, lower = %private, "attached");
    Ok(h)
}

/// 双向终止握手后交还下层句柄；错误转为强制关闭。
pub async fn detach(h: Handle, ctx: &CallContext) -> Result<Handle> {
    let stream = handle::control::<CrlfStream>(h, ops::DETACH)?;
    let result = shutdown_handshake(stream.as_ref(), ctx).await;
    if result.is_ok() {
        stream.released.store(true, Ordering::SeqCst);
    }
    let lower = stream.lower;
    drop(stream);
    handle::close(h);
    debug!(target: "braid::crlf", handle = %h, ok = result.is_ok(), "detached");
    result.map(|()| lower)
}

async fn shutdown_handshake(stream: &CrlfStream, ctx: &CallContext) -> Result<()> {
    match SockObject::done(stream, ctx).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::Pipe => {}
        Err(err) => return Err(err),
    }
    loop {
        match MessageStream::recv_vectored(stream, None, ctx).await {
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::Pipe => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}
