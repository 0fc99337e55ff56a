//! 批量合并层：出站字节先进缓冲，攒满 `batch` 字节或距首字节
//! `interval` 后合并写出。入站方向纯直通。
//!
//! 间隔冲刷由一个助手任务完成；`done` 与摘除/关闭都无条件冲刷。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use braid_core::async_trait;
use braid_core::context::{CallContext, Deadline};
use braid_core::contract::{ByteStream, SockObject};
use braid_core::error::{Result, not_supported};
use braid_core::handle::{self, Handle};
use braid_core::iol::RecvSeg;
use braid_core::state::HalfState;

mod ops {
    pub const ATTACH: &str = "nagle.attach";
    pub const DETACH: &str = "nagle.detach";
    pub const SEND: &str = "nagle.send";
    pub const RECV: &str = "nagle.recv";
    pub const DONE: &str = "nagle.done";
}

/// 放弃路径上冲刷残留数据的宽限时间。
const SALVAGE_GRACE: Duration = Duration::from_secs(1);

struct BatchState {
    buf: BytesMut,
    /// 当前批次首字节进入缓冲的时刻；缓冲为空时为 `None`。
    first: Option<Instant>,
    state: HalfState,
}

/// 批量合并对象。
pub(crate) struct NagleStream {
    lower: Handle,
    lower_obj: Arc<dyn SockObject>,
    batch: usize,
    interval: Duration,
    tx: AsyncMutex<BatchState>,
    notify: Arc<Notify>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl NagleStream {
    fn lower_bytestream(&self, op: &'static str) -> Result<&dyn ByteStream> {
        self.lower_obj.as_bytestream().ok_or_else(|| not_supported(op))
    }
}

/// 冲刷当前批次。调用方需持有 `tx` 锁。
async fn flush_locked(
    stream: &NagleStream,
    state: &mut BatchState,
    ctx: &CallContext,
) -> Result<()> {
    state.first = None;
    if state.buf.is_empty() {
        return Ok(());
    }
    let data = state.buf.split().freeze();
    match stream.lower_bytestream(ops::SEND)?.send_vectored(&[&data[..]], ctx).await {
        Ok(()) => Ok(()),
        Err(err) => {
            state.state.poison();
            Err(err)
        }
    }
}

fn spawn_flusher(stream: &Arc<NagleStream>) -> JoinHandle<()> {
    let weak = Arc::downgrade(stream);
    let notify = Arc::clone(&stream.notify);
    let interval = stream.interval;
    tokio::spawn(async move {
        loop {
            // 等待某次发送把首字节放进空缓冲。
            notify.notified().await;
            loop {
                let deadline = {
                    let Some(stream) = weak.upgrade() else { return };
                    let guard = stream.tx.lock().await;
                    match guard.first {
                        None => break,
                        Some(first) => first + interval,
                    }
                };
                tokio::time::sleep_until(deadline).await;
                let Some(stream) = weak.upgrade() else { return };
                let mut guard = stream.tx.lock().await;
                if let Some(first) = guard.first
                    && Instant::now() >= first + interval
                {
                    let ctx = CallContext::never();
                    if let Err(err) = flush_locked(&stream, &mut guard, &ctx).await {
                        warn!(target: "braid::nagle", error = %err, "interval flush failed");
                        break;
                    }
                }
            }
        }
    })
}

impl Drop for NagleStream {
    fn drop(&mut self) {
        if let Some(task) = self.flusher.lock().take() {
            task.abort();
        }
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let state = self.tx.get_mut();
        let pending = if state.buf.is_empty() || state.state.is_poisoned() {
            None
        } else {
            Some(state.buf.split().freeze())
        };
        let lower = self.lower;
        match (pending, tokio::runtime::Handle::try_current()) {
            (Some(data), Ok(rt)) => {
                // 无条件冲刷：残留批次交给一个分离任务带宽限发出。
                let lower_obj = Arc::clone(&self.lower_obj);
                rt.spawn(async move {
                    let ctx = CallContext::with_deadline(Deadline::after(SALVAGE_GRACE));
                    if let Some(bs) = lower_obj.as_bytestream() {
                        if let Err(err) = bs.send_vectored(&[&data[..]], &ctx).await {
                            warn!(target: "braid::nagle", error = %err, "salvage flush failed");
                        }
                    }
                    handle::close(lower);
                });
            }
            (Some(_), Err(_)) => {
                warn!(target: "braid::nagle", "runtime gone; dropping batched bytes");
                handle::close(lower);
            }
            (None, _) => handle::close(lower),
        }
    }
}

#[async_trait]
impl SockObject for NagleStream {
    fn kind(&self) -> &'static str {
        "nagle.stream"
    }

    fn as_bytestream(&self) -> Option<&dyn ByteStream> {
        Some(self)
    }

    async fn done(&self, ctx: &CallContext) -> Result<()> {
        let mut guard = self.tx.lock().await;
        guard.state.check(ops::DONE)?;
        flush_locked(self, &mut guard, ctx).await?;
        self.lower_obj.done(ctx).await?;
        guard.state.set_done();
        Ok(())
    }
}

#[async_trait]
impl ByteStream for NagleStream {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
        let mut guard = self.tx.lock().await;
        guard.state.check(ops::SEND)?;
        for seg in segs {
            guard.buf.extend_from_slice(seg);
        }
        if guard.first.is_none() && !guard.buf.is_empty() {
            guard.first = Some(Instant::now());
            self.notify.notify_one();
        }
        if guard.buf.len() >= self.batch {
            flush_locked(self, &mut guard, ctx).await?;
        }
        Ok(())
    }

    async fn recv_vectored(&self, segs: &mut [RecvSeg<'_>], ctx: &CallContext) -> Result<()> {
        self.lower_bytestream(ops::RECV)?.recv_vectored(segs, ctx).await
    }
}

/// 在字节流句柄上叠放批量合并层。下层句柄被消费。
///
/// `batch` 为攒批字节数上限，`interval` 为距首字节的最长滞留时间；
/// 必须在 Tokio 运行时内调用（助手任务在此产生）。
pub fn attach(lower: Handle, batch: usize, interval: Duration) -> Result<Handle> {
    let lower_obj = handle::object(lower, ops::ATTACH)?;
    if lower_obj.as_bytestream().is_none() {
        return Err(not_supported(ops::ATTACH));
    }
    let private = handle::dup(lower)?;
    handle::close(lower);
    let stream = Arc::new(NagleStream {
        lower: private,
        lower_obj,
        batch: batch.max(1),
        interval,
        tx: AsyncMutex::new(BatchState {
            buf: BytesMut::new(),
            first: None,
            state: HalfState::new(),
        }),
        notify: Arc::new(Notify::new()),
        flusher: Mutex::new(None),
        released: AtomicBool::new(false),
    });
    *stream.flusher.lock() = Some(spawn_flusher(&stream));
    let h = handle::register(stream);
    debug!(target: "braid::nagle", handle = %h, lower = %private, batch, interval = ?interval, "attached");
    Ok(h)
}

/// 冲刷残留批次后摘除本层，交还下层句柄。冲刷失败转为强制关闭。
pub async fn detach(h: Handle, ctx: &CallContext) -> Result<Handle> {
    let stream = handle::control::<NagleStream>(h, ops::DETACH)?;
    let result = {
        let mut guard = stream.tx.lock().await;
        flush_locked(stream.as_ref(), &mut guard, ctx).await
    };
    if result.is_ok() {
        stream.released.store(true, Ordering::SeqCst);
    }
    let lower = stream.lower;
    drop(stream);
    handle::close(h);
    result.map(|()| lower)
}
