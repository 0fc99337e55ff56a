#![deny(unsafe_code)]
#![doc = r#"
# braid-middleware

## 设计动机（Why）
- **定位**：不改变数据语义的直通层。三种：
  - [`trace`]：把每次收发以十六进制写入结构化日志，用于验证“叠层
    保值”——穿过它的字节必须逐字节不变；
  - [`throttle`]：按“每秒 N 字节 / N 条消息”限制吞吐，配额按给定
    间隔重算；
  - [`nagle`]：出站字节先进批量缓冲，攒满 `batch` 字节或距首字节
    `interval` 毫秒后合并写出。
- **架构角色**：可自由插入字节流（trace/throttle/nagle）或消息
  （throttle 消息变体）管线的任意一层。

## 核心契约（What）
- 三者的 `attach` 都消费下层句柄，`detach` 原样交还（nagle 先冲刷
  批量缓冲）；没有线上握手。
- throttle 配额耗尽时挂起到下一个重算点或截止时间（先到者生效，
  截止报 `TimedOut`）；同方向 FIFO。
- nagle 的 `done` 与关闭都无条件冲刷缓冲。
"#]

pub mod nagle;
pub mod throttle;
pub mod trace;

pub use throttle::Quota;
