//! 流式传输的收发半部：全量成功或失败，方向粘滞。

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use braid_core::context::{CallContext, race_with_context};
use braid_core::contract::{ByteStream, SockObject};
use braid_core::error::{ErrorKind, Result, map_io_error, pipe_error, reset_error};
use braid_core::iol::RecvSeg;
use braid_core::state::HalfState;

use crate::staging::StagingBuf;

/// 暂存读缓冲的默认容量。
pub const DEFAULT_STAGING_CAPACITY: usize = 2048;

enum Fail {
    /// 对端干净地关闭了自己的发送方向。
    Eof,
    Io(io::Error),
}

/// 发送半部：串行化一个方向的全部写出。
#[derive(Debug)]
pub struct StreamTx<W> {
    writer: W,
    state: HalfState,
}

impl<W: AsyncWrite + Unpin> StreamTx<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, state: HalfState::new() }
    }

    pub fn state(&self) -> &HalfState {
        &self.state
    }

    /// 全量写出列表中的字节；任何失败（含超时、取消）都使方向中毒。
    pub async fn send(&mut self, segs: &[&[u8]], ctx: &CallContext, op: &'static str) -> Result<()> {
        self.state.check(op)?;
        let writer = &mut self.writer;
        let outcome = race_with_context(ctx, op, async move {
            for seg in segs {
                if seg.is_empty() {
                    continue;
                }
                writer.write_all(seg).await?;
            }
            io::Result::Ok(())
        })
        .await;
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.state.poison();
                Err(map_io_error(op, err))
            }
            Err(err) => {
                self.state.poison();
                Err(err)
            }
        }
    }

    /// 半关闭：宣告本端不再发送（流式套接字上发出 FIN）。
    pub async fn shutdown(&mut self, ctx: &CallContext, op: &'static str) -> Result<()> {
        self.state.check(op)?;
        let writer = &mut self.writer;
        match race_with_context(ctx, op, writer.shutdown()).await {
            Ok(Ok(())) => {
                self.state.set_done();
                Ok(())
            }
            Ok(Err(err)) => {
                self.state.poison();
                Err(map_io_error(op, err))
            }
            Err(err) => {
                self.state.poison();
                Err(err)
            }
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// 接收半部：暂存缓冲 + 恰好收满的散布读取。
#[derive(Debug)]
pub struct StreamRx<R> {
    reader: R,
    staging: StagingBuf,
    state: HalfState,
}

impl<R: AsyncRead + Unpin> StreamRx<R> {
    pub fn new(reader: R, staging_capacity: usize) -> Self {
        Self { reader, staging: StagingBuf::new(staging_capacity), state: HalfState::new() }
    }

    pub fn state(&self) -> &HalfState {
        &self.state
    }

    /// 恰好收满各段容量之和。
    ///
    /// 干净 EOF 且本次请求尚无任何进展：`Pipe`，方向标记结束；
    /// EOF 出现在请求中途：`ConnectionReset`，方向中毒；
    /// 超时/取消：原样返回并中毒——被放弃的请求可能已消费了流中字节。
    pub async fn recv(
        &mut self,
        segs: &mut [RecvSeg<'_>],
        ctx: &CallContext,
        op: &'static str,
    ) -> Result<()> {
        self.state.check(op)?;
        let mut progress = false;
        let outcome = {
            let Self { reader, staging, .. } = self;
            race_with_context(ctx, op, fill_segments(reader, staging, segs, &mut progress)).await
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Fail::Eof)) if !progress => {
                self.state.set_done();
                Err(pipe_error(op))
            }
            Ok(Err(Fail::Eof)) => {
                self.state.poison();
                Err(reset_error(op))
            }
            Ok(Err(Fail::Io(err))) => {
                self.state.poison();
                Err(map_io_error(op, err))
            }
            Err(err) => {
                self.state.poison();
                Err(err)
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

async fn fill_segments<R: AsyncRead + Unpin>(
    reader: &mut R,
    staging: &mut StagingBuf,
    segs: &mut [RecvSeg<'_>],
    progress: &mut bool,
) -> core::result::Result<(), Fail> {
    for seg in segs.iter_mut() {
        match seg {
            RecvSeg::Buf(buf) => {
                let mut filled = 0;
                while filled < buf.len() {
                    if staging.available() > 0 {
                        filled += staging.take(&mut buf[filled..]);
                        *progress = true;
                        continue;
                    }
                    let want = buf.len() - filled;
                    if want >= staging.capacity() {
                        // 大块读绕过暂存区，直接落入调用方缓冲。
                        let n = reader.read(&mut buf[filled..]).await.map_err(Fail::Io)?;
                        if n == 0 {
                            return Err(Fail::Eof);
                        }
                        filled += n;
                        *progress = true;
                    } else {
                        refill(reader, staging).await?;
                    }
                }
            }
            RecvSeg::Discard(total) => {
                let mut left = *total;
                while left > 0 {
                    if staging.available() == 0 {
                        refill(reader, staging).await?;
                    }
                    let k = staging.skip(left);
                    left -= k;
                    if k > 0 {
                        *progress = true;
                    }
                }
            }
        }
    }
    Ok(())
}

/// 流式连接的优雅终止：半关闭本端，然后排空对端数据直至其 EOF。
///
/// 调用方已自行半关闭（`done` 报 `Pipe`）时直接进入排空阶段；任何其他
/// 错误中断终止流程并原样上抛。
pub async fn graceful_stop<T>(obj: &T, ctx: &CallContext) -> Result<()>
where
    T: SockObject + ByteStream,
{
    match obj.done(ctx).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::Pipe => {}
        Err(err) => return Err(err),
    }
    loop {
        let mut seg = [RecvSeg::Discard(1)];
        match ByteStream::recv_vectored(obj, &mut seg, ctx).await {
            Ok(()) => continue,
            Err(err) if err.kind() == ErrorKind::Pipe => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

async fn refill<R: AsyncRead + Unpin>(
    reader: &mut R,
    staging: &mut StagingBuf,
) -> core::result::Result<(), Fail> {
    let n = reader.read(staging.buf_mut()).await.map_err(Fail::Io)?;
    if n == 0 {
        return Err(Fail::Eof);
    }
    staging.set_filled(n);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::error::ErrorKind;
    use tokio::io::duplex;

    const OP_SEND: &str = "test.send";
    const OP_RECV: &str = "test.recv";

    #[tokio::test]
    async fn exact_receive_across_segments() {
        let (a, b) = duplex(64);
        let (_, a_w) = tokio::io::split(a);
        let (b_r, _b_w) = tokio::io::split(b);
        let mut tx = StreamTx::new(a_w);
        let mut rx = StreamRx::new(b_r, 4);
        let ctx = CallContext::never();

        tx.send(&[b"hello", b" ", b"world"], &ctx, OP_SEND).await.unwrap();

        let mut head = [0u8; 5];
        let mut tail = [0u8; 5];
        rx.recv(
            &mut [RecvSeg::Buf(&mut head), RecvSeg::Discard(1), RecvSeg::Buf(&mut tail)],
            &ctx,
            OP_RECV,
        )
        .await
        .unwrap();
        assert_eq!(&head, b"hello");
        assert_eq!(&tail, b"world");
    }

    #[tokio::test]
    async fn large_read_bypasses_staging() {
        let (a, b) = duplex(8192);
        let (_, a_w) = tokio::io::split(a);
        let (b_r, _b_w) = tokio::io::split(b);
        let mut tx = StreamTx::new(a_w);
        // 暂存区仅 4 字节，大读必须直落调用方缓冲。
        let mut rx = StreamRx::new(b_r, 4);
        let ctx = CallContext::never();

        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        tx.send(&[&payload], &ctx, OP_SEND).await.unwrap();

        let mut out = vec![0u8; 1024];
        rx.recv(&mut [RecvSeg::Buf(&mut out)], &ctx, OP_RECV).await.unwrap();
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn clean_eof_before_progress_is_pipe_then_sticky() {
        let (a, b) = duplex(64);
        drop(a);
        let (b_r, _b_w) = tokio::io::split(b);
        let mut rx = StreamRx::new(b_r, 16);
        let ctx = CallContext::never();

        let mut buf = [0u8; 4];
        let err = rx.recv(&mut [RecvSeg::Buf(&mut buf)], &ctx, OP_RECV).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Pipe);

        // 方向已结束：重复调用仍是 Pipe。
        let err = rx.recv(&mut [RecvSeg::Buf(&mut buf)], &ctx, OP_RECV).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Pipe);
    }

    #[tokio::test]
    async fn eof_mid_request_is_reset_then_sticky() {
        let (a, b) = duplex(64);
        let (_, mut a_w) = tokio::io::split(a);
        let (b_r, _b_w) = tokio::io::split(b);
        let mut rx = StreamRx::new(b_r, 16);
        let ctx = CallContext::never();

        a_w.write_all(b"ab").await.unwrap();
        drop(a_w);

        let mut buf = [0u8; 4];
        let err = rx.recv(&mut [RecvSeg::Buf(&mut buf)], &ctx, OP_RECV).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);

        let err = rx.recv(&mut [RecvSeg::Buf(&mut buf)], &ctx, OP_RECV).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn timeout_poisons_receive_direction() {
        let (a, b) = duplex(64);
        let (_a_r, _a_w) = tokio::io::split(a);
        let (b_r, _b_w) = tokio::io::split(b);
        let mut rx = StreamRx::new(b_r, 16);

        let ctx = CallContext::deadline_in(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 4];
        let err = rx.recv(&mut [RecvSeg::Buf(&mut buf)], &ctx, OP_RECV).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);

        let ctx = CallContext::never();
        let err = rx.recv(&mut [RecvSeg::Buf(&mut buf)], &ctx, OP_RECV).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }
}
