#![deny(unsafe_code)]
#![doc = r#"
# braid-transport-tcp

## 设计动机（Why）
- **定位**：在 Tokio 运行时上提供 TCP 字节流传输：监听、建连、全量
  收发、半关闭与优雅停止，产物是可被任意协议层叠放的句柄。
- **架构角色**：协议栈的地基介质之一；上层分帧/中间件 crate 只认
  `braid-core` 的字节流契约，对 TCP 细节无感。

## 核心契约（What）
- `listen`/`accept`/`connect`/`attach` 产出句柄；`detach` 交还裸的
  `std::net::TcpStream`；`stop` 执行“半关闭 + 排空 + 关闭”的优雅终止。
- 收发遵循字节流契约：全量成功或失败；对端先行半关闭时，空请求上的
  干净 EOF 报 `Pipe`，请求中途的 EOF 报 `ConnectionReset` 并使方向中毒。
- `done`（经 `braid_core::handle::done` 调用）即 TCP 半关闭：发出 FIN，
  之后本端发送报 `Pipe`。

## 实现策略（How）
- 连接拆分为读写半部，各自由 `tokio::sync::Mutex` 串行化，同方向 FIFO、
  两方向互不阻塞；接收侧复用 `braid-transport` 的暂存缓冲。
- 监听套接字经 `socket2` 显式构造：非阻塞、`SO_REUSEADDR`、调用方给定
  的 backlog。

## 风险与考量（Trade-offs）
- 超时/取消按契约使方向中毒；需要“探测后继续用”的调用方应自行在更
  上层缓冲。
- `detach` 要求句柄处于静止状态且无 `dup` 副本，否则拒绝拆解。
"#]

mod channel;
mod listener;

pub use channel::{
    attach, attach_with_config, connect, connect_with_config, detach, local_addr, peer_addr, stop,
};
pub use listener::{accept, listen, listen_with_config};
