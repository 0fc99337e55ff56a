#![deny(unsafe_code)]
#![doc = r#"
# braid-transport-udp

## 设计动机（Why）
- **定位**：无连接的 UDP 消息传输：一次发送对应一个数据报，一次接收
  取回一个完整数据报及其来源地址。
- **架构角色**：协议栈的消息介质地基；经句柄暴露消息接口后，消息层
  中间件（如消息限流）可以直接叠放其上。

## 核心契约（What）
- `socket(local, remote)`：绑定本地地址并可选记住默认远端；消息接口的
  发送走默认远端，没有默认远端时报 `InvalidInput`。
- `send`：**发后不理**——内核发送缓冲已满时静默丢弃该数据报并返回
  成功，这是有意为之的数据报语义。
- `recv`：数据报超出调用方容量时按内核语义截断，返回截断后的长度；
  `segs` 传 `None` 时仍消费一个数据报并丢弃负载。

## 风险与考量（Trade-offs）
- 不维护方向粘滞位：数据报之间彼此独立，不存在“流中毒”的概念；
  超出容量的报文尾部无法找回。
"#]

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::debug;

use braid_core::async_trait;
use braid_core::context::{CallContext, run_with_context};
use braid_core::contract::{MessageStream, SockObject};
use braid_core::error::{CoreError, ErrorKind, Result, map_io_error};
use braid_core::handle::{self, Handle};
use braid_core::iol::{RecvSeg, recv_capacity, total_len};

mod ops {
    pub const SOCKET: &str = "udp.socket";
    pub const ATTACH: &str = "udp.attach";
    pub const DETACH: &str = "udp.detach";
    pub const SEND: &str = "udp.send";
    pub const RECV: &str = "udp.recv";
    pub const ADDR: &str = "udp.addr";
}

/// UDP 端点对象：句柄表中的消息能力提供者。
struct UdpEndpoint {
    socket: UdpSocket,
    local: SocketAddr,
    remote: Option<SocketAddr>,
}

impl SockObject for UdpEndpoint {
    fn kind(&self) -> &'static str {
        "udp.socket"
    }

    fn as_message(&self) -> Option<&dyn MessageStream> {
        Some(self)
    }
}

#[async_trait]
impl MessageStream for UdpEndpoint {
    async fn send_vectored(&self, segs: &[&[u8]], _ctx: &CallContext) -> Result<()> {
        // 数据报发送不会挂起：发后不理。
        self.send_segments(None, segs, ops::SEND)
    }

    async fn recv_vectored(
        &self,
        segs: Option<&mut [RecvSeg<'_>]>,
        ctx: &CallContext,
    ) -> Result<usize> {
        self.recv_segments(segs, ctx).await.map(|(n, _)| n)
    }
}

impl UdpEndpoint {
    fn send_segments(
        &self,
        addr: Option<SocketAddr>,
        segs: &[&[u8]],
        op: &'static str,
    ) -> Result<()> {
        let target = addr
            .or(self.remote)
            .ok_or_else(|| CoreError::new(ErrorKind::InvalidInput, op))?;
        if total_len(segs) == 0 {
            return Err(CoreError::new(ErrorKind::InvalidInput, op));
        }
        let joined;
        let datagram: &[u8] = match segs {
            [single] => single,
            _ => {
                joined = segs.concat();
                &joined
            }
        };
        match self.socket.try_send_to(datagram, target) {
            Ok(_) => Ok(()),
            // 内核缓冲已满：按数据报语义静默丢弃。
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(map_io_error(op, err)),
        }
    }

    async fn recv_segments(
        &self,
        segs: Option<&mut [RecvSeg<'_>]>,
        ctx: &CallContext,
    ) -> Result<(usize, SocketAddr)> {
        match segs {
            Some([RecvSeg::Buf(buf)]) => {
                // 单段接收直接落入调用方缓冲。
                run_with_context(ctx, ops::RECV, self.socket.recv_from(buf)).await
            }
            Some(segs) => {
                let capacity = recv_capacity(segs).max(1);
                let mut scratch = vec![0u8; capacity];
                let (n, addr) =
                    run_with_context(ctx, ops::RECV, self.socket.recv_from(&mut scratch)).await?;
                scatter(&scratch[..n], segs);
                Ok((n, addr))
            }
            None => {
                // 无缓冲也要消费掉一个数据报；负载丢弃。
                let mut dummy = [0u8; 4];
                run_with_context(ctx, ops::RECV, self.socket.recv_from(&mut dummy)).await
            }
        }
    }
}

fn scatter(mut data: &[u8], segs: &mut [RecvSeg<'_>]) {
    for seg in segs.iter_mut() {
        if data.is_empty() {
            break;
        }
        match seg {
            RecvSeg::Buf(buf) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                data = &data[n..];
            }
            RecvSeg::Discard(cap) => {
                let n = (*cap).min(data.len());
                data = &data[n..];
            }
        }
    }
}

/// 打开 UDP 端点：绑定 `local`（缺省为通配地址 + 临时端口），可选记住
/// 默认远端。两个地址的地址族必须一致。
pub fn socket(local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Result<Handle> {
    if let (Some(l), Some(r)) = (local, remote) {
        if l.is_ipv4() != r.is_ipv4() {
            return Err(CoreError::new(ErrorKind::InvalidInput, ops::SOCKET));
        }
    }
    let bind = local.unwrap_or_else(|| {
        let ip = match remote {
            Some(r) if r.is_ipv6() => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        SocketAddr::new(ip, 0)
    });
    let std_socket =
        std::net::UdpSocket::bind(bind).map_err(|err| map_io_error(ops::SOCKET, err))?;
    register_socket(std_socket, remote, ops::SOCKET)
}

/// 接管一个既有的标准库 UDP 套接字。
pub fn attach(socket: std::net::UdpSocket) -> Result<Handle> {
    register_socket(socket, None, ops::ATTACH)
}

fn register_socket(
    socket: std::net::UdpSocket,
    remote: Option<SocketAddr>,
    op: &'static str,
) -> Result<Handle> {
    socket.set_nonblocking(true).map_err(|err| map_io_error(op, err))?;
    let socket = UdpSocket::from_std(socket).map_err(|err| map_io_error(op, err))?;
    let local = socket.local_addr().map_err(|err| map_io_error(op, err))?;
    let h = handle::register(Arc::new(UdpEndpoint { socket, local, remote }));
    debug!(target: "braid::udp", handle = %h, %local, remote = ?remote, "socket ready");
    Ok(h)
}

/// 拆解句柄，交还裸的标准库套接字。句柄被消费。
pub fn detach(h: Handle) -> Result<std::net::UdpSocket> {
    let endpoint = handle::control::<UdpEndpoint>(h, ops::DETACH)?;
    handle::close(h);
    let endpoint = Arc::try_unwrap(endpoint)
        .map_err(|_| CoreError::new(ErrorKind::InvalidInput, ops::DETACH))?;
    endpoint.socket.into_std().map_err(|err| map_io_error(ops::DETACH, err))
}

/// 发出一个数据报；`addr` 缺省时使用构造时记住的远端。发后不理。
pub fn send(h: Handle, addr: Option<SocketAddr>, segs: &[&[u8]]) -> Result<()> {
    let endpoint = handle::control::<UdpEndpoint>(h, ops::SEND)?;
    endpoint.send_segments(addr, segs, ops::SEND)
}

/// 收取一个数据报，返回（截断后的）长度与来源地址。
pub async fn recv(
    h: Handle,
    segs: Option<&mut [RecvSeg<'_>]>,
    ctx: &CallContext,
) -> Result<(usize, SocketAddr)> {
    let endpoint = handle::control::<UdpEndpoint>(h, ops::RECV)?;
    endpoint.recv_segments(segs, ctx).await
}

/// 实际绑定的本地地址（临时端口在此读回）。
pub fn local_addr(h: Handle) -> Result<SocketAddr> {
    Ok(handle::control::<UdpEndpoint>(h, ops::ADDR)?.local)
}
