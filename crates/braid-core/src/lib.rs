#![deny(unsafe_code)]
#![doc = r#"
# braid-core

## 设计动机（Why）
- **定位**：braid 协议栈的最底层契约 crate，提供“整数句柄 + 能力查询”的
  多态套接字抽象。任何传输介质或协议层都以同一套句柄语义接入。
- **架构角色**：上层 crate（传输实现、分帧编解码、直通中间件）只依赖本
  crate 暴露的契约即可互相叠放：字节流之上套分帧层，分帧层之上再套限流
  层，组合始终是线性的。
- **设计理念**：句柄的所有权在任意时刻恰好属于一个持有者；层通过
  “复制后关闭”的习惯用法取得下层句柄的独占所有权，`detach` 时再原样交还。

## 核心契约（What）
- **句柄表**：[`handle`] 模块维护进程级句柄表，`register`/`dup`/`close`/
  `done`/`object` 是全部生命周期原语；`close` 不可失败并递归关闭子资源。
- **能力查询**：[`contract::SockObject`] 以访问器形式回答“该句柄支持哪些
  接口”；查询不支持的能力报 [`error::ErrorKind::NotSupported`]。
- **两种数据接口**：[`contract::ByteStream`]（有序可靠字节流，全量成功或
  失败）与 [`contract::MessageStream`]（保留报文边界的消息通道）。
- **调用上下文**：所有可能挂起的操作都接受 [`context::CallContext`]，
  其中封装绝对截止时间与取消令牌；超时报 `TimedOut`，取消报 `Cancelled`。

## 实现策略（How）
- **执行框架**：依赖 Tokio 的时间与同步原语；本 crate 不直接触碰套接字，
  就绪性等待由传输 crate 通过运行时完成。
- **错误治理**：[`error::CoreError`] 携带稳定操作码与 POSIX errno 对应的
  错误类别，方向性“中毒”规则由 [`state::HalfState`] 统一承载。

## 风险与考量（Trade-offs）
- **单线程假设**：契约语义按协作式单线程调度描述，但对象均为
  `Send + Sync`、句柄表由互斥锁保护，在多线程运行时上同样安全；
  顺序保证只承诺到“每方向 FIFO”。
- **句柄即整数**：句柄在 `close` 后立即失效且槽位可复用，调用方不得缓存
  已关闭的句柄。
"#]

pub use async_trait::async_trait;

pub mod bytestream;
pub mod context;
pub mod contract;
pub mod error;
pub mod handle;
pub mod iol;
pub mod message;
pub mod prelude;
pub mod state;

pub use error::{CoreError, ErrorKind, Result};
