use std::fmt;
use std::io;

use thiserror::Error;

/// 统一返回别名：错误类型默认为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// 错误类别，与 POSIX errno 语义一一对应。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 协议栈的失败模式是封闭集合：调用方依据类别决定重试、放弃或关闭，
///   不应解析字符串；
/// - 与底层 C 传统（errno）保持可解释的映射，方便跨语言排障。
///
/// ## 契约（What）
/// - `Pipe`：对端已宣告流结束，或本端 `done` 之后继续发送；
/// - `ConnectionReset`：对端异常消失、意外 EOF，以及任何“已中毒”方向的
///   后续调用；
/// - `MessageTooLarge`：整帧消息超出调用方提供的缓冲容量；
/// - 其余变体按表意使用，`Io` 兜底承载未分类的系统错误。
///
/// ## 注意事项（Trade-offs）
/// - 类别刻意保持粗粒度；若需要精确的系统错误，请读取
///   [`CoreError::io_source`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 参数非法或帧内容违反协议（EINVAL）。
    InvalidInput,
    /// 句柄不支持所查询的能力（ENOTSUP）。
    NotSupported,
    /// 截止时间先于操作完成到达（ETIMEDOUT）。
    TimedOut,
    /// 调用上下文被取消（ECANCELED）。
    Cancelled,
    /// 对端干净地结束了流，或本方向已宣告结束（EPIPE）。
    Pipe,
    /// 对端异常消失或方向已中毒（ECONNRESET）。
    ConnectionReset,
    /// 整帧消息超出调用方缓冲（EMSGSIZE）。
    MessageTooLarge,
    /// 内存分配失败（ENOMEM）。
    OutOfMemory,
    /// UNIX 套接字路径超出平台上限（ENAMETOOLONG）。
    NameTooLong,
    /// 句柄不在句柄表中（EBADF）。
    BadHandle,
    /// 其他未分类的系统错误。
    Io,
}

impl ErrorKind {
    /// 返回稳定的短名，用于日志与断言输出。
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::NotSupported => "not-supported",
            ErrorKind::TimedOut => "timed-out",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Pipe => "pipe",
            ErrorKind::ConnectionReset => "connection-reset",
            ErrorKind::MessageTooLarge => "message-too-large",
            ErrorKind::OutOfMemory => "out-of-memory",
            ErrorKind::NameTooLong => "name-too-long",
            ErrorKind::BadHandle => "bad-handle",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 协议栈统一错误：类别 + 稳定操作码 + 可选的系统错误源。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每条错误都能回答“哪个操作、哪类失败”，操作码（如 `"tcp.connect"`）
///   低基数且稳定，可直接作为观测维度；
/// - 保留 [`io::Error`] 源，排障时不丢失内核侧细节。
///
/// ## 契约（What）
/// - `kind`/`op` 构造后不可变；
/// - 同一方向中毒后的重复调用返回 `ConnectionReset` 类别、原操作码。
#[derive(Debug, Error)]
#[error("{op}: {kind}")]
pub struct CoreError {
    kind: ErrorKind,
    op: &'static str,
    #[source]
    source: Option<io::Error>,
}

impl CoreError {
    /// 构造不带系统错误源的错误。
    pub fn new(kind: ErrorKind, op: &'static str) -> Self {
        Self { kind, op, source: None }
    }

    /// 构造携带系统错误源的错误。
    pub fn with_source(kind: ErrorKind, op: &'static str, source: io::Error) -> Self {
        Self { kind, op, source: Some(source) }
    }

    /// 错误类别。
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 发生错误的操作码。
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// 底层系统错误（若有）。
    pub fn io_source(&self) -> Option<&io::Error> {
        self.source.as_ref()
    }
}

/// 将系统错误映射为 [`CoreError`]。
///
/// 发送端的 `BrokenPipe` 归入 `ConnectionReset`：对端在我们仍要写入时
/// 消失，语义上等同连接被重置。
pub fn map_io_error(op: &'static str, err: io::Error) -> CoreError {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut => ErrorKind::TimedOut,
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionReset,
        io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
        io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
        io::ErrorKind::Unsupported => ErrorKind::NotSupported,
        _ => ErrorKind::Io,
    };
    CoreError::with_source(kind, op, err)
}

/// 截止时间到达。
pub fn timeout_error(op: &'static str) -> CoreError {
    CoreError::new(ErrorKind::TimedOut, op)
}

/// 调用上下文被取消。
pub fn cancelled_error(op: &'static str) -> CoreError {
    CoreError::new(ErrorKind::Cancelled, op)
}

/// 能力缺失。
pub fn not_supported(op: &'static str) -> CoreError {
    CoreError::new(ErrorKind::NotSupported, op)
}

/// 句柄不在表中。
pub fn bad_handle(op: &'static str) -> CoreError {
    CoreError::new(ErrorKind::BadHandle, op)
}

/// 流或方向已干净结束。
pub fn pipe_error(op: &'static str) -> CoreError {
    CoreError::new(ErrorKind::Pipe, op)
}

/// 方向已中毒或对端异常消失。
pub fn reset_error(op: &'static str) -> CoreError {
    CoreError::new(ErrorKind::ConnectionReset, op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_pipe_maps_to_connection_reset() {
        let err = map_io_error("t.send", io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
        assert_eq!(err.op(), "t.send");
        assert!(err.io_source().is_some());
    }

    #[test]
    fn display_carries_op_and_kind() {
        let err = timeout_error("t.recv");
        assert_eq!(err.to_string(), "t.recv: timed-out");
    }
}
