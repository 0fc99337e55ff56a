#![deny(unsafe_code)]
#![doc = r#"
# braid-codec-pfx

## 设计动机（Why）
- **定位**：把任意字节流句柄变成消息句柄的长度前缀分帧层。线格式：
  8 字节大端 `u64` 长度 + 负载；全 1（`u64::MAX`）是终止标记，永远不是
  合法长度。
- **架构角色**：叠放在 TCP/UNIX 等字节流传输（或任何字节流中间件）
  之上；`attach` 消费下层句柄，`detach` 在双向终止握手完成后把它
  原样交还。

## 核心契约（What）
- 发送：在调用方的段列表前拼上头部段，对下层发出**单次**全量写；
  调用方列表形状不被改动。
- 接收：先读 8 字节头部；终止标记使接收方向结束（此后报 `Pipe`）；
  消息超出调用方容量时报 `MessageTooLarge` 并中毒，不代为跳过负载。
- `done`：发出终止标记并结束发送方向；`detach`：补发终止标记（如
  尚未发出）、丢弃入站消息直至观察到对端的终止标记，然后交还下层
  句柄；任何错误转为强制关闭。

## 风险与考量（Trade-offs）
- 方向状态由两把异步互斥锁承载：同方向 FIFO，收发互不阻塞。
- 头部读取失败（包括下层的干净 EOF）一律视为接收方向中毒：缺少
  终止标记的流结束不是本层的合法结束。
"#]

mod pfx;

pub use pfx::{attach, detach};
