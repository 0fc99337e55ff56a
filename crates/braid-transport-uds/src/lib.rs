#![cfg(unix)]
#![deny(unsafe_code)]
#![doc = r#"
# braid-transport-uds

## 设计动机（Why）
- **定位**：UNIX 域流式套接字传输：监听、建连、套接字对、全量收发、
  半关闭与优雅停止，契约与 TCP 传输完全一致。
- **架构角色**：本机进程间通信的地基介质；同时是分帧层测试的首选
  载体——`pair()` 不经过网络栈，两端都在本进程内。

## 核心契约（What）
- `listen(path, backlog)`/`accept`/`connect(path)`/`pair` 产出句柄；
  `detach` 交还 `std::os::unix::net::UnixStream`；`stop` 执行优雅终止。
- 路径超出平台 `sun_path` 上限时报 `NameTooLong`；监听路径对应的文件
  由调用方负责清理。
- 收发、EOF、中毒语义与 TCP 相同（见 `braid-transport`）。

## 风险与考量（Trade-offs）
- 仅支持 UNIX 平台；crate 在其他平台上编译为空。
"#]

mod channel;
mod listener;

pub use channel::{attach, attach_with_config, connect, connect_with_config, detach, pair, stop};
pub use listener::{accept, listen, listen_with_config};
