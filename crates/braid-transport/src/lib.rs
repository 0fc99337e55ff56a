#![deny(unsafe_code)]
#![doc = r#"
# braid-transport

## 设计动机（Why）
- **定位**：TCP 与 UNIX 流式传输共享同一套文件描述符层面的管线：固定
  容量的暂存读缓冲、“全量成功或失败”的收发循环、EOF 语义判定与套接字
  调优。本 crate 把这些积木集中一处，介质 crate 只保留各自的建连与
  句柄装配逻辑。
- **架构角色**：位于 `braid-core` 契约与具体介质实现之间的实现辅助层；
  不出现在调用方的依赖里。

## 核心契约（What）
- [`stream::StreamRx`]/[`stream::StreamTx`]：带方向粘滞位的接收/发送半部。
  接收端实现“小读走暂存区、大读直落调用方缓冲”的策略；干净 EOF 在请求
  尚无进展时报 `Pipe` 并标记方向结束，中途 EOF 报 `ConnectionReset` 并
  中毒；发送端全量写出，任何失败（含超时、取消）都使方向中毒。
- [`tune`]：监听套接字的显式构造（`SO_REUSEADDR`、backlog、非阻塞）与
  已建立连接的平台调优（如 Apple 平台的 `SO_NOSIGPIPE`）。
- [`addr`]：地址族偏好驱动的本地/远端地址求解。

## 风险与考量（Trade-offs）
- 暂存区容量固定（默认 2 KiB）；它只为减少小读的系统调用次数存在，
  不承诺任何流控语义。
- 超时/取消会把接收方向一并中毒：被放弃的请求可能已消费了流中的
  字节，继续使用只能读到错位的数据。
"#]

pub mod addr;
pub mod staging;
pub mod stream;
pub mod tune;

pub use staging::StagingBuf;
pub use stream::{DEFAULT_STAGING_CAPACITY, StreamRx, StreamTx, graceful_stop};
pub use tune::StreamConfig;
