//! 句柄背后的套接字对象契约：能力查询、两种数据接口与半关闭。

use std::any::Any;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::{Result, not_supported};
use crate::iol::RecvSeg;

/// 有序、可靠、双向的字节通道能力。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `send_vectored`：发出列表中的**全部**字节，否则失败；部分发送对
///   调用方不可见，任何失败都使发送方向中毒；截止先到报 `TimedOut`
///   且同样中毒。
/// - `recv_vectored`：恰好收满各段容量之和；`Discard(n)` 段丢弃 n 字节。
///   干净 EOF 且本次请求尚未收到任何字节时报 `Pipe` 并把接收方向标记
///   为已结束；EOF 出现在请求中途则报 `ConnectionReset` 并中毒。
///
/// ## 注意事项（Trade-offs）
/// - 两个方向各自由实现内部的互斥锁串行化，同方向调用 FIFO，两个方向
///   互不阻塞。
#[async_trait]
pub trait ByteStream: Send + Sync {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()>;
    async fn recv_vectored(&self, segs: &mut [RecvSeg<'_>], ctx: &CallContext) -> Result<()>;
}

/// 保留报文边界的消息通道能力。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `send_vectored`：各段拼接为一条消息发出。
/// - `recv_vectored`：收取**一整条**消息并返回其真实长度；消息超出调用
///   方容量时报 `MessageTooLarge` 并使接收方向中毒（剩余字节不会被代为
///   跳过）；`segs` 传 `None` 时消息照常按帧消费、负载直接丢弃。
/// - 消息相对分帧是原子的：调用方要么观察到完整消息，要么观察到错误，
///   绝不会把前缀当作成功返回。
#[async_trait]
pub trait MessageStream: Send + Sync {
    async fn send_vectored(&self, segs: &[&[u8]], ctx: &CallContext) -> Result<()>;
    async fn recv_vectored(
        &self,
        segs: Option<&mut [RecvSeg<'_>]>,
        ctx: &CallContext,
    ) -> Result<usize>;
}

/// 句柄表中每个条目背后的对象：能力查询 + 生命周期钩子。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 这是整个栈的多态分发点：调用方拿着整数句柄，通过访问器询问对象
///   “你是字节流吗 / 你是消息通道吗”，或经由 `Any` 向下转型到某一层的
///   私有控制接口（`detach` 即借此取回下层句柄）；
/// - 类型标签集合是封闭的：字节流、消息，以及每个层各自的具体类型。
///
/// ## 契约（What）
/// - `as_bytestream` / `as_message`：支持则返回接口，否则 `None`，句柄层
///   将其翻译为 `NotSupported`；
/// - `done`：可选的半关闭信号，默认不支持；分帧层借此发出终止标记；
/// - 关闭是 Drop 驱动的：对象被从句柄表移除并失去最后一个引用时，
///   析构必须同步、不可失败地回收全部下属资源（包括递归关闭自己持有
///   的下层句柄）。
#[async_trait]
pub trait SockObject: Any + Send + Sync {
    /// 对象种类标签，仅用于日志与调试。
    fn kind(&self) -> &'static str;

    fn as_bytestream(&self) -> Option<&dyn ByteStream> {
        None
    }

    fn as_message(&self) -> Option<&dyn MessageStream> {
        None
    }

    /// 半关闭：宣告本端不再发送。默认不支持。
    async fn done(&self, ctx: &CallContext) -> Result<()> {
        let _ = ctx;
        Err(not_supported("handle.done"))
    }
}
