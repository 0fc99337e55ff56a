//! 十六进制观测层：逐次收发写入诊断日志并原样转发。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use braid_core::async_trait;
use braid_core::context::CallContext;
use braid_core::contract::{ByteStream, SockObject};
use braid_core::error::{Result, not_supported};
use braid_core::handle::{self, Handle};
use braid_core::iol::{RecvSeg, total_len};

mod ops {
    pub const ATTACH: &str = "trace.attach";
    pub const DETACH: &str = "trace.detach";
    pub const SEND: &str = "trace.send";
    pub const RECV: &str = "trace.recv";
}

/// 观测层对象：除下层句柄外不持有任何状态。
pub(crate) struct TraceStream {
    lower: Handle,
    lower_obj: Arc<dyn SockObject>,
    released: AtomicBool,
}

impl TraceStream {
    fn lower_bytestream(&self, op: &'static str) -> Result<&dyn ByteStream> {
        self.lower_obj.as_bytestream().ok_or_else(|| not_supported(op))
    }
}

impl Drop for TraceStream {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            handle::close(self.lower);
        }
    }
}

fn hex_of_send(segs: &[&[u8]]) -> String {
    let mut out = String::with_capacity(total_len(segs) * 2);
    for seg in segs {
        out.push_str(&hex::encode(seg));
    }
    out
}

fn hex_of_recv(segs: &[RecvSeg<'_>]) -> String {
    let mut out = String::new();
    for seg in segs {
        match seg {
            RecvSeg::Buf(buf) => out.push_str(&hex::encode(&buf[..])),
            RecvSeg::Discard(n) => out.push_str(&format!("<skip {n}>")),
        }
    }
    out
}

#[async_trait]
impl SockObject for TraceStream {
    fn kind(&self) -> &'static str {
        "trace.stream"
    }

    fn as_bytestream(&self) -> Option<&dyn ByteStream> {
        Some(self)
    }

    async fn done(&self, ctx: &CallContext) -> Result<()> {
        debug!(target: "braid::trace", "done");
        self.lower_obj.done(ctx).await
    }
}

#[async_trait]
impl ByteStream for TraceStream {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
        debug!(
            target: "braid::trace",
            len = total_len(segs),
            data = %hex_of_send(segs),
            "send"
        );
        self.lower_bytestream(ops::SEND)?.send_vectored(segs, ctx).await
    }

    async fn recv_vectored(&self, segs: &mut [RecvSeg<'_>], ctx: &CallContext) -> Result<()> {
        self.lower_bytestream(ops::RECV)?.recv_vectored(segs, ctx).await?;
        debug!(
            target: "braid::trace",
            len = braid_core::iol::recv_capacity(segs),
            data = %hex_of_recv(segs),
            "recv"
        );
        Ok(())
    }
}

/// 在字节流句柄上叠放观测层。下层句柄被消费。
pub fn attach(lower: Handle) -> Result<Handle> {
    let lower_obj = handle::object(lower, ops::ATTACH)?;
    if lower_obj.as_bytestream().is_none() {
        return Err(not_supported(ops::ATTACH));
    }
    let private = handle::dup(lower)?;
    handle::close(lower);
    let h = handle::register(Arc::new(TraceStream {
        lower: private,
        lower_obj,
        released: AtomicBool::new(false),
    }));
    debug!(target: "braid::trace", handle = %h, lower = %private, "attached");
    Ok(h)
}

/// 摘除观测层，交还下层句柄。没有线上握手。
pub fn detach(h: Handle) -> Result<Handle> {
    let stream = handle::control::<TraceStream>(h, ops::DETACH)?;
    stream.released.store(true, Ordering::SeqCst);
    let lower = stream.lower;
    drop(stream);
    handle::close(h);
    Ok(lower)
}
