//! 散布/聚集 I/O 列表。
//!
//! 发送侧直接使用 `&[&[u8]]`：切片表示天然无环，也不存在“空指针段”。
//! 接收侧的段是 [`RecvSeg`]：要么写入调用方缓冲，要么按长度丢弃。
//! 层在内部裁剪列表时只借出子视图，调用方列表的形状从不被改写。

/// 接收侧的一个散布段。
#[derive(Debug)]
pub enum RecvSeg<'a> {
    /// 写入调用方缓冲。
    Buf(&'a mut [u8]),
    /// 丢弃指定字节数（对应“空指针段跳过 N 字节”的语义）。
    Discard(usize),
}

impl RecvSeg<'_> {
    /// 该段可容纳的字节数。
    pub fn len(&self) -> usize {
        match self {
            RecvSeg::Buf(b) => b.len(),
            RecvSeg::Discard(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 发送列表的总字节数。
pub fn total_len(segs: &[&[u8]]) -> usize {
    segs.iter().map(|s| s.len()).sum()
}

/// 接收列表的总容量（含丢弃段）。
pub fn recv_capacity(segs: &[RecvSeg<'_>]) -> usize {
    segs.iter().map(RecvSeg::len).sum()
}

/// 接收列表上的游标：按需借出至多 `max` 字节的前缀子视图并前移。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 分帧层需要“把调用方列表裁剪到恰好 N 字节”（长度前缀接收），
///   限流层需要“按配额把一次接收切成多段”——二者的共同原语就是
///   “借出前缀视图”；
/// - 借出的是可变子切片，原列表结构保持不变，归还（借用结束）后
///   剩余容量继续可用。
///
/// ## 契约（What）
/// - [`RecvCursor::take`] 返回覆盖至多 `max` 字节的段视图；容量不足时
///   返回较短视图，调用方据此判定 `MessageTooLarge` 一类错误；
/// - 视图的生命周期绑定在 `&mut self` 借用上，必须先用完再取下一段。
pub struct RecvCursor<'a, 'b> {
    segs: &'a mut [RecvSeg<'b>],
    idx: usize,
    off: usize,
}

impl<'a, 'b> RecvCursor<'a, 'b> {
    pub fn new(segs: &'a mut [RecvSeg<'b>]) -> Self {
        Self { segs, idx: 0, off: 0 }
    }

    /// 游标之后仍可写入的字节数。
    pub fn remaining(&self) -> usize {
        let mut total = 0;
        for (i, seg) in self.segs.iter().enumerate().skip(self.idx) {
            total += seg.len();
            if i == self.idx {
                total -= self.off;
            }
        }
        total
    }

    /// 借出覆盖至多 `max` 字节的前缀视图并前移游标。
    pub fn take(&mut self, max: usize) -> Vec<RecvSeg<'_>> {
        let mut out = Vec::new();
        let mut want = max;
        let mut off = self.off;
        let mut advanced = 0usize;
        for seg in self.segs[self.idx..].iter_mut() {
            if want == 0 {
                break;
            }
            let len = seg.len();
            let avail = len - off;
            let k = want.min(avail);
            if k > 0 {
                match seg {
                    RecvSeg::Buf(b) => out.push(RecvSeg::Buf(&mut b[off..off + k])),
                    RecvSeg::Discard(_) => out.push(RecvSeg::Discard(k)),
                }
            }
            want -= k;
            if off + k == len {
                advanced += 1;
                off = 0;
            } else {
                off += k;
                break;
            }
        }
        self.idx += advanced;
        self.off = off;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(segs: &mut [RecvSeg<'_>], byte: u8) {
        for seg in segs {
            if let RecvSeg::Buf(b) = seg {
                b.fill(byte);
            }
        }
    }

    #[test]
    fn capacity_counts_discard_segments() {
        let mut a = [0u8; 3];
        let mut segs = [RecvSeg::Buf(&mut a), RecvSeg::Discard(5)];
        assert_eq!(recv_capacity(&segs), 8);
        assert!(!segs[1].is_empty());
    }

    #[test]
    fn cursor_splits_across_segments() {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut segs = [RecvSeg::Buf(&mut a), RecvSeg::Buf(&mut b)];
        let mut cursor = RecvCursor::new(&mut segs);

        let mut first = cursor.take(6);
        assert_eq!(recv_capacity(&first), 6);
        fill(&mut first, 1);

        let mut second = cursor.take(6);
        // 只剩 2 字节容量。
        assert_eq!(recv_capacity(&second), 2);
        fill(&mut second, 2);

        assert_eq!(a, [1, 1, 1, 1]);
        assert_eq!(b, [1, 1, 2, 2]);
    }

    #[test]
    fn cursor_trims_discard_segments() {
        let mut segs = [RecvSeg::Discard(10)];
        let mut cursor = RecvCursor::new(&mut segs);
        let view = cursor.take(3);
        assert_eq!(recv_capacity(&view), 3);
        drop(view);
        assert_eq!(cursor.remaining(), 7);
        drop(cursor);
        // 原始列表形状不变。
        assert_eq!(segs[0].len(), 10);
    }

    #[test]
    fn cursor_handles_empty_segments() {
        let mut a = [0u8; 0];
        let mut b = [0u8; 2];
        let mut segs = [RecvSeg::Buf(&mut a), RecvSeg::Buf(&mut b)];
        let mut cursor = RecvCursor::new(&mut segs);
        let view = cursor.take(4);
        assert_eq!(recv_capacity(&view), 2);
        drop(view);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn send_list_total_len() {
        assert_eq!(total_len(&[b"ab", b"", b"cde"]), 5);
    }
}
