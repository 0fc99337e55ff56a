//! 吞吐限流层：字节变体与消息变体。
//!
//! 每个方向一份配额，按调用方给定的间隔重算。配额耗尽时操作挂起到
//! 下一个重算点或截止时间（先到者生效）。同方向调用经互斥锁天然
//! FIFO。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::debug;

use braid_core::async_trait;
use braid_core::context::{CallContext, sleep_with_context};
use braid_core::contract::{ByteStream, MessageStream, SockObject};
use braid_core::error::{ErrorKind, Result, not_supported, reset_error};
use braid_core::handle::{self, Handle};
use braid_core::iol::{RecvCursor, RecvSeg, recv_capacity, total_len};
use braid_core::state::HalfState;

mod ops {
    pub const ATTACH: &str = "throttle.attach";
    pub const DETACH: &str = "throttle.detach";
    pub const SEND: &str = "throttle.send";
    pub const RECV: &str = "throttle.recv";
}

/// 单方向限流参数：每秒 `throughput` 个单位，配额每 `interval` 重算。
///
/// `throughput` 为 0 或 `interval` 为零时该方向不限流。
#[derive(Clone, Copy, Debug)]
pub struct Quota {
    pub throughput: u64,
    pub interval: Duration,
}

impl Quota {
    pub fn new(throughput: u64, interval: Duration) -> Self {
        Self { throughput, interval }
    }

    fn enabled(self) -> Option<Self> {
        if self.throughput == 0 || self.interval.is_zero() { None } else { Some(self) }
    }
}

/// 运行中的配额状态。
struct QuotaState {
    quota: Quota,
    allowance: u64,
    tick: Instant,
}

impl QuotaState {
    fn new(quota: Quota) -> Self {
        Self { quota, allowance: Self::budget(quota), tick: Instant::now() }
    }

    /// 单个重算周期内的预算；至少为 1，低速配置不至于饿死。
    fn budget(quota: Quota) -> u64 {
        (quota.throughput.saturating_mul(quota.interval.as_millis() as u64) / 1000).max(1)
    }

    /// 申请至多 `want` 个单位；配额耗尽时睡到下一个重算点。
    async fn consume(&mut self, want: u64, ctx: &CallContext, op: &'static str) -> Result<u64> {
        loop {
            let now = Instant::now();
            if now >= self.tick + self.quota.interval {
                self.allowance = Self::budget(self.quota);
                self.tick = now;
            }
            if self.allowance > 0 {
                let granted = self.allowance.min(want);
                self.allowance -= granted;
                return Ok(granted);
            }
            sleep_with_context(ctx, op, self.tick + self.quota.interval).await?;
        }
    }
}

struct DirState {
    quota: Option<QuotaState>,
    state: HalfState,
}

impl DirState {
    fn new(quota: Option<Quota>) -> Self {
        Self { quota: quota.and_then(Quota::enabled).map(QuotaState::new), state: HalfState::new() }
    }
}

/// 字节流限流对象。
pub(crate) struct ByteThrottleStream {
    lower: Handle,
    lower_obj: Arc<dyn SockObject>,
    tx: AsyncMutex<DirState>,
    rx: AsyncMutex<DirState>,
    released: AtomicBool,
}

impl ByteThrottleStream {
    fn lower_bytestream(&self, op: &'static str) -> Result<&dyn ByteStream> {
        self.lower_obj.as_bytestream().ok_or_else(|| not_supported(op))
    }
}

impl Drop for ByteThrottleStream {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            handle::close(self.lower);
        }
    }
}

#[async_trait]
impl SockObject for ByteThrottleStream {
    fn kind(&self) -> &'static str {
        "throttle.bytes"
    }

    fn as_bytestream(&self) -> Option<&dyn ByteStream> {
        Some(self)
    }

    async fn done(&self, ctx: &CallContext) -> Result<()> {
        self.lower_obj.done(ctx).await
    }
}

#[async_trait]
impl ByteStream for ByteThrottleStream {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
        let mut dir = self.tx.lock().await;
        dir.state.check(ops::SEND)?;
        let bs = self.lower_bytestream(ops::SEND)?;
        let DirState { quota, state } = &mut *dir;
        let result = match quota {
            None => bs.send_vectored(segs, ctx).await,
            Some(quota) => send_paced(bs, quota, segs, ctx).await,
        };
        if result.is_err() {
            state.poison();
        }
        result
    }

    async fn recv_vectored(&self, segs: &mut [RecvSeg<'_>], ctx: &CallContext) -> Result<()> {
        let mut dir = self.rx.lock().await;
        dir.state.check(ops::RECV)?;
        let bs = self.lower_bytestream(ops::RECV)?;
        let DirState { quota, state } = &mut *dir;
        match quota {
            None => {
                let result = bs.recv_vectored(segs, ctx).await;
                if let Err(err) = &result {
                    if err.kind() == ErrorKind::Pipe {
                        state.set_done();
                    } else {
                        state.poison();
                    }
                }
                result
            }
            Some(quota) => recv_paced(bs, quota, state, segs, ctx).await,
        }
    }
}

/// 按配额切片写出。
async fn send_paced(
    bs: &dyn ByteStream,
    quota: &mut QuotaState,
    segs: &[&[u8]],
    ctx: &CallContext,
) -> Result<()> {
    let mut remaining = total_len(segs) as u64;
    let mut idx = 0usize;
    let mut off = 0usize;
    while remaining > 0 {
        let granted = quota.consume(remaining, ctx, ops::SEND).await? as usize;
        let mut list: Vec<&[u8]> = Vec::new();
        let mut left = granted;
        while left > 0 {
            let seg = segs[idx];
            let avail = seg.len() - off;
            if avail == 0 {
                idx += 1;
                off = 0;
                continue;
            }
            let k = left.min(avail);
            list.push(&seg[off..off + k]);
            off += k;
            left -= k;
        }
        bs.send_vectored(&list, ctx).await?;
        remaining -= granted as u64;
    }
    Ok(())
}

/// 按配额切片收取。
async fn recv_paced(
    bs: &dyn ByteStream,
    quota: &mut QuotaState,
    state: &mut HalfState,
    segs: &mut [RecvSeg<'_>],
    ctx: &CallContext,
) -> Result<()> {
    let mut remaining = recv_capacity(segs) as u64;
    let mut cursor = RecvCursor::new(segs);
    let mut progress = false;
    while remaining > 0 {
        let granted = match quota.consume(remaining, ctx, ops::RECV).await {
            Ok(granted) => granted,
            Err(err) => {
                state.poison();
                return Err(err);
            }
        };
        let mut view = cursor.take(granted as usize);
        match bs.recv_vectored(&mut view, ctx).await {
            Ok(()) => {
                progress = true;
                remaining -= granted;
            }
            Err(err) if err.kind() == ErrorKind::Pipe && !progress => {
                // 请求尚无进展时的干净 EOF 原样透传。
                state.set_done();
                return Err(err);
            }
            Err(err) if err.kind() == ErrorKind::Pipe => {
                state.poison();
                return Err(reset_error(ops::RECV));
            }
            Err(err) => {
                state.poison();
                return Err(err);
            }
        }
    }
    Ok(())
}

/// 消息限流对象：每条消息消耗一个配额单位，数据本身原样转发。
pub(crate) struct MsgThrottleStream {
    lower: Handle,
    lower_obj: Arc<dyn SockObject>,
    tx: AsyncMutex<Option<QuotaState>>,
    rx: AsyncMutex<Option<QuotaState>>,
    released: AtomicBool,
}

impl MsgThrottleStream {
    fn lower_message(&self, op: &'static str) -> Result<&dyn MessageStream> {
        self.lower_obj.as_message().ok_or_else(|| not_supported(op))
    }
}

impl Drop for MsgThrottleStream {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            handle::close(self.lower);
        }
    }
}

#[async_trait]
impl SockObject for MsgThrottleStream {
    fn kind(&self) -> &'static str {
        "throttle.messages"
    }

    fn as_message(&self) -> Option<&dyn MessageStream> {
        Some(self)
    }

    async fn done(&self, ctx: &CallContext) -> Result<()> {
        self.lower_obj.done(ctx).await
    }
}

#[async_trait]
impl MessageStream for MsgThrottleStream {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
        let mut quota = self.tx.lock().await;
        if let Some(quota) = quota.as_mut() {
            quota.consume(1, ctx, ops::SEND).await?;
        }
        self.lower_message(ops::SEND)?.send_vectored(segs, ctx).await
    }

    async fn recv_vectored(
        &self,
        segs: Option<&mut [RecvSeg<'_>]>,
        ctx: &CallContext,
    ) -> Result<usize> {
        let mut quota = self.rx.lock().await;
        if let Some(quota) = quota.as_mut() {
            quota.consume(1, ctx, ops::RECV).await?;
        }
        self.lower_message(ops::RECV)?.recv_vectored(segs, ctx).await
    }
}

/// 在字节流句柄上叠放字节限流层。`send`/`recv` 分别限制两个方向，
/// `None`（或零参数）表示该方向不限流。下层句柄被消费。
pub fn attach_bytes(lower: Handle, send: Option<Quota>, recv: Option<Quota>) -> Result<Handle> {
    let lower_obj = handle::object(lower, ops::ATTACH)?;
    if lower_obj.as_bytestream().is_none() {
        return Err(not_supported(ops::ATTACH));
    }
    let private = handle::dup(lower)?;
    handle::close(lower);
    let h = handle::register(Arc::new(ByteThrottleStream {
        lower: private,
        lower_obj,
        tx: AsyncMutex::new(DirState::new(send)),
        rx: AsyncMutex::new(DirState::new(recv)),
        released: AtomicBool::new(false),
    }));
    debug!(target: "braid::throttle", handle = %h, lower = %private, "bytes attached");
    Ok(h)
}

/// 在消息句柄上叠放消息限流层。下层句柄被消费。
pub fn attach_messages(lower: Handle, send: Option<Quota>, recv: Option<Quota>) -> Result<Handle> {
    let lower_obj = handle::object(lower, ops::ATTACH)?;
    if lower_obj.as_message().is_none() {
        return Err(not_supported(ops::ATTACH));
    }
    let private = handle::dup(lower)?;
    handle::close(lower);
    let h = handle::register(Arc::new(MsgThrottleStream {
        lower: private,
        lower_obj,
        tx: AsyncMutex::new(send.and_then(Quota::enabled).map(QuotaState::new)),
        rx: AsyncMutex::new(recv.and_then(Quota::enabled).map(QuotaState::new)),
        released: AtomicBool::new(false),
    }));
    debug!(target: "braid::throttle", handle = %h, lower = %private, "messages attached");
    Ok(h)
}

/// 摘除限流层（任一变体），交还下层句柄。没有线上握手。
pub fn detach(h: Handle) -> Result<Handle> {
    if let Ok(stream) = handle::control::<ByteThrottleStream>(h, ops::DETACH) {
        stream.released.store(true, Ordering::SeqCst);
        let lower = stream.lower;
        drop(stream);
        handle::close(h);
        return Ok(lower);
    }
    let stream = handle::control::<MsgThrottleStream>(h, ops::DETACH)?;
    stream.released.store(true, Ordering::SeqCst);
    let lower = stream.lower;
    drop(stream);
    handle::close(h);
    Ok(lower)
}
