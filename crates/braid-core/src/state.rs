//! 方向粘滞状态：每个分帧层（以及字节流传输）为发送与接收两个方向各持
//! 一份 [`HalfState`]，承载四个方向粘滞位中属于本方向的两位。

use crate::error::{Result, pipe_error, reset_error};

/// 单方向状态机：`done` 表示该方向已宣告/观察到流结束，`err` 表示该方向
/// 已中毒。
///
/// 不变式：`done` 之后的同向操作报 `Pipe`；`err` 之后的同向操作报
/// `ConnectionReset`，且不再尝试任何 I/O。检查顺序先 `done` 后 `err`，
/// 与历史行为一致。
#[derive(Debug, Default)]
pub struct HalfState {
    done: bool,
    err: bool,
}

impl HalfState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进入本方向操作前的门卫检查。
    pub fn check(&self, op: &'static str) -> Result<()> {
        if self.done {
            return Err(pipe_error(op));
        }
        if self.err {
            return Err(reset_error(op));
        }
        Ok(())
    }

    /// 标记本方向中毒。
    pub fn poison(&mut self) {
        self.err = true;
    }

    /// 标记本方向流结束。
    pub fn set_done(&mut self) {
        self.done = true;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_poisoned(&self) -> bool {
        self.err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn done_takes_precedence_over_err() {
        let mut half = HalfState::new();
        half.set_done();
        half.poison();
        assert_eq!(half.check("t.op").unwrap_err().kind(), ErrorKind::Pipe);
    }

    #[test]
    fn poisoned_half_reports_reset() {
        let mut half = HalfState::new();
        half.poison();
        assert_eq!(half.check("t.op").unwrap_err().kind(), ErrorKind::ConnectionReset);
    }
}
