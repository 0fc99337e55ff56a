use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{CoreError, Result, cancelled_error, map_io_error, timeout_error};

/// 绝对截止时间：`never` 表示无限等待，已过期的截止时间表示“非阻塞探测”。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“等多久”从每个调用点抽出来：所有挂起点共享同一种截止语义，
///   层与层之间透传同一个值即可；
/// - 采用单调时钟，避免墙钟回拨造成的提前超时或永不超时。
///
/// ## 契约（What）
/// - `never()`：永不超时；
/// - `immediate()`：立即到期——操作仍会先做一次非阻塞尝试，只有在需要
///   挂起时才返回 `TimedOut`；
/// - `after(d)` / `at(i)`：相对 / 绝对构造。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// 永不超时。
    pub const fn never() -> Self {
        Self(None)
    }

    /// 立即到期（非阻塞探测）。
    pub fn immediate() -> Self {
        Self(Some(Instant::now()))
    }

    /// 距现在 `d` 之后到期。
    pub fn after(d: Duration) -> Self {
        Self(Some(Instant::now() + d))
    }

    /// 在绝对时间点 `i` 到期。
    pub fn at(i: Instant) -> Self {
        Self(Some(i))
    }

    /// 截止时间点；`None` 表示永不超时。
    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// 截止时间是否已过。
    pub fn expired(&self) -> bool {
        match self.0 {
            Some(i) => Instant::now() >= i,
            None => false,
        }
    }

    /// 两个截止时间中更早的一个。
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (Some(a), None) => Deadline(Some(a)),
            (None, b) => Deadline(b),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::never()
    }
}

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// 可克隆的取消令牌：任意持有者调用 [`Cancellation::cancel`] 后，所有
/// 挂起点观察到取消并报 `Cancelled`。
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<CancelInner>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发取消。幂等。
    pub fn cancel(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    /// 是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    /// 挂起直至取消发生。
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.0.notify.notified();
            // 先注册等待者再复查，避免与 cancel() 竞争时丢失唤醒。
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// 调用上下文：截止时间 + 取消令牌。所有可能挂起的操作都以它为第一
/// 公民参数。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 超时与取消是同一类控制流（“别再等了”），合并为一个值在层间透传，
///   避免每层各自发明参数；
/// - 层在收到同一个 `CallContext` 时天然继承上游的截止与取消语义。
///
/// ## 契约（What）
/// - `never()`：不超时、不取消的默认上下文；
/// - `with_deadline` / `deadline_in`：限定截止；
/// - `cancellation()` 克隆出的令牌可交给另一任务触发取消。
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    deadline: Deadline,
    cancellation: Cancellation,
}

impl CallContext {
    /// 不超时、不取消。
    pub fn never() -> Self {
        Self::default()
    }

    /// 使用给定截止时间。
    pub fn with_deadline(deadline: Deadline) -> Self {
        Self { deadline, cancellation: Cancellation::new() }
    }

    /// 距现在 `d` 之后到期。
    pub fn deadline_in(d: Duration) -> Self {
        Self::with_deadline(Deadline::after(d))
    }

    /// 替换取消令牌（构造器风格）。
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }
}

async fn sleep_until_opt(instant: Option<Instant>) {
    match instant {
        Some(i) => tokio::time::sleep_until(i).await,
        None => std::future::pending::<()>().await,
    }
}

/// 让任意 Future 在截止时间与取消令牌的监督下运行。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 这是协议栈里唯一一处把“业务 IO”“截止时间”“取消”三者拼在一起的
///   地方，所有挂起点共用同一套竞争规则；
/// - `biased` 轮询顺序保证：即使截止时间已过，Future 仍先获得一次
///   非阻塞的推进机会——这正是“已过期截止时间 = 非阻塞探测”的由来。
///
/// ## 契约（What）
/// - Future 先完成：透传其输出；
/// - 取消先到：`Cancelled`；截止先到：`TimedOut`；
/// - 超时或取消时 Future 被原地丢弃，已发生的部分进展由调用方按
///   方向中毒规则处置。
pub async fn race_with_context<T, F>(ctx: &CallContext, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);
    tokio::select! {
        biased;
        out = &mut fut => Ok(out),
        _ = ctx.cancellation().cancelled() => Err(cancelled_error(op)),
        _ = sleep_until_opt(ctx.deadline().instant()) => Err(timeout_error(op)),
    }
}

/// [`race_with_context`] 的系统 IO 变体：把 `io::Result` 一并映射为
/// [`CoreError`]。
pub async fn run_with_context<T, F>(ctx: &CallContext, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    race_with_context(ctx, op, fut).await?.map_err(|err| map_io_error(op, err))
}

/// 在上下文监督下睡到 `until`；截止先到报 `TimedOut`，取消报 `Cancelled`。
pub async fn sleep_with_context(ctx: &CallContext, op: &'static str, until: Instant) -> Result<()> {
    race_with_context(ctx, op, tokio::time::sleep_until(until)).await
}
