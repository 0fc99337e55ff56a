//! 字节流操作的句柄入口：查表、能力查询、转发。

use crate::context::CallContext;
use crate::error::{Result, not_supported};
use crate::handle::{self, Handle};
use crate::iol::RecvSeg;

pub(crate) mod ops {
    pub const SEND: &str = "bytestream.send";
    pub const RECV: &str = "bytestream.recv";
}

/// 发出列表中的全部字节，或失败。
pub async fn send_vectored(h: Handle, segs: &[&[u8]], ctx: &CallContext) -> Result<()> {
    let obj = handle::object(h, ops::SEND)?;
    let bs = obj.as_bytestream().ok_or_else(|| not_supported(ops::SEND))?;
    bs.send_vectored(segs, ctx).await
}

/// 单段便捷形式。
pub async fn send(h: Handle, buf: &[u8], ctx: &CallContext) -> Result<()> {
    send_vectored(h, &[buf], ctx).await
}

/// 恰好收满各段容量之和，或失败。
pub async fn recv_vectored(h: Handle, segs: &mut [RecvSeg<'_>], ctx: &CallContext) -> Result<()> {
    let obj = handle::object(h, ops::RECV)?;
    let bs = obj.as_bytestream().ok_or_else(|| not_supported(ops::RECV))?;
    bs.recv_vectored(segs, ctx).await
}

/// 单段便捷形式。
pub async fn recv(h: Handle, buf: &mut [u8], ctx: &CallContext) -> Result<()> {
    recv_vectored(h, &mut [RecvSeg::Buf(buf)], ctx).await
}
