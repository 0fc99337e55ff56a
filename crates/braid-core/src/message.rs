//! 消息操作的句柄入口：查表、能力查询、转发。

use crate::context::CallContext;
use crate::error::{Result, not_supported};
use crate::handle::{self, Handle};
use crate::iol::RecvSeg;

pub(crate) mod ops {
    pub const SEND: &str = "message.send";
    pub const RECV: &str = "message.recv";
}

/// 把各段拼接为一条消息发出。
pub async fn send_vectored(h: Handle, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
    let obj = handle::object(h, ops::SEND)?;
    let ms = obj.as_message().ok_or_else(|| not_supported(ops::SEND))?;
    ms.send_vectored(segs, ctx).await
}

/// 单段便捷形式。
pub async fn send(h: Handle, buf: &[u8], ctx: &CallContext) -> Result<()> {
    send_vectored(h, &[buf], ctx).await
}

/// 收取一整条消息，返回真实长度；`segs` 为 `None` 时丢弃负载。
pub async fn recv_vectored(
    h: Handle,
    segs: Option<&mut [RecvSeg<'_>]>,
    ctx: &CallContext,
) -> Result<usize> {
    let obj = handle::object(h, ops::RECV)?;
    let ms = obj.as_message().ok_or_else(|| not_supported(ops::RECV))?;
    ms.recv_vectored(segs, ctx).await
}

/// 单段便捷形式。
pub async fn recv(h: Handle, buf: &mut [u8], ctx: &CallContext) -> Result<usize> {
    recv_vectored(h, Some(&mut [RecvSeg::Buf(buf)]), ctx).await
}
