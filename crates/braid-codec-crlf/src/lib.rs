#![deny(unsafe_code)]
#![doc = r#"
# braid-codec-crlf

## 设计动机（Why）
- **定位**：以 `\r\n` 分隔消息的文本分帧层；空行（连续的 `\r\n`）是
  终止标记。面向 SMTP/POP3 一类逐行协议的最小分帧。
- **架构角色**：与长度前缀层同属“字节流 → 消息”的分帧家族，叠放与
  握手语义完全一致，只是线格式不同。

## 核心契约（What）
- 发送：负载中不得出现 `\r\n` 序列（跨段同样检测），也不得发送空
  消息——二者都报 `InvalidInput` 并使发送方向中毒；合法负载在调用方
  段列表之后拼接 `\r\n` 段，单次全量写出。
- 接收：逐字节读取（经缓存的下层接口转发，避免每字节查表）；返回
  长度不含 CRLF；缓冲在终止序列出现前耗尽时报 `MessageTooLarge` 并
  中毒。
- `done`：发出空行；`detach`：补发空行并丢弃入站消息直至对端空行。

## 实现策略（How）
- 接收端持有一个“待定字节”：只有确认某字节不是终止序列的一部分才
  写入调用方缓冲。容量校验发生在写入之前，调用方缓冲不需要为 CRLF
  预留空间，恰好填满缓冲的消息是合法的。

## 风险与考量（Trade-offs）
- 逐字节读取以简单换性能；下层的暂存缓冲保证每 2 KiB 才发生一次
  系统调用。
"#]

mod crlf;

pub use crlf::{attach, detach};
