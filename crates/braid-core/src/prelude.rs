//! 常用导出集合：上层 crate 与测试以 `use braid_core::prelude::*;` 获得
//! 契约类型与上下文原语。

pub use crate::context::{
    CallContext, Cancellation, Deadline, race_with_context, run_with_context, sleep_with_context,
};
pub use crate::contract::{ByteStream, MessageStream, SockObject};
pub use crate::error::{CoreError, ErrorKind, Result};
pub use crate::handle::Handle;
pub use crate::iol::{RecvCursor, RecvSeg, recv_capacity, total_len};
pub use crate::state::HalfState;
