//! 接收侧暂存缓冲：小读先落到这里，再按需拷出给调用方。

/// 固定容量的暂存读缓冲。
///
/// `pos..len` 之间是尚未被取走的数据；取空之后才允许重新灌入。
#[derive(Debug)]
pub struct StagingBuf {
    data: Box<[u8]>,
    pos: usize,
    len: usize,
}

impl StagingBuf {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "staging capacity must be non-zero");
        Self { data: vec![0u8; capacity].into_boxed_slice(), pos: 0, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 尚未取走的字节数。
    pub fn available(&self) -> usize {
        self.len - self.pos
    }

    /// 拷出至多 `dst.len()` 字节，返回实际拷出的数量。
    pub fn take(&mut self, dst: &mut [u8]) -> usize {
        let n = self.available().min(dst.len());
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// 丢弃至多 `n` 字节，返回实际丢弃的数量。
    pub fn skip(&mut self, n: usize) -> usize {
        let k = self.available().min(n);
        self.pos += k;
        k
    }

    /// 可供整体重新灌入的内部缓冲。仅在取空后使用。
    pub(crate) fn buf_mut(&mut self) -> &mut [u8] {
        debug_assert_eq!(self.available(), 0);
        &mut self.data
    }

    /// 标记缓冲中现有 `n` 字节有效数据。
    pub(crate) fn set_filled(&mut self, n: usize) {
        debug_assert!(n <= self.data.len());
        self.pos = 0;
        self.len = n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_and_skip_advance_in_order() {
        let mut staging = StagingBuf::new(8);
        staging.buf_mut()[..6].copy_from_slice(b"abcdef");
        staging.set_filled(6);

        let mut out = [0u8; 2];
        assert_eq!(staging.take(&mut out), 2);
        assert_eq!(&out, b"ab");
        assert_eq!(staging.skip(3), 3);
        assert_eq!(staging.available(), 1);

        let mut rest = [0u8; 4];
        assert_eq!(staging.take(&mut rest), 1);
        assert_eq!(rest[0], b'f');
        assert_eq!(staging.available(), 0);
    }
}
