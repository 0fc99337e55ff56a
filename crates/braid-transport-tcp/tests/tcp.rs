//! TCP 传输端到端测试：握手、截止时间、推回与拆解/接管。
//!
//! 所有用例都在回环地址上使用内核分配的临时端口，互不干扰。

use std::time::{Duration, Instant};

use braid_core::context::CallContext;
use braid_core::error::ErrorKind;
use braid_core::{bytestream, handle};
use braid_transport_tcp as tcp;

fn loopback() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// 基本 ping-pong：双向各送一条短数据。
#[tokio::test]
async fn ping_pong() {
    let ctx = CallContext::never();
    let ls = tcp::listen(loopback(), 10).unwrap();
    let addr = tcp::local_addr(ls).unwrap();

    let client = tokio::spawn(async move {
        let ctx = CallContext::never();
        let cs = tcp::connect(addr, &ctx).await.unwrap();
        let mut buf = [0u8; 3];
        bytestream::recv(cs, &mut buf, &ctx).await.unwrap();
        assert_eq!(&buf, b"ABC");
        bytestream::send(cs, b"456", &ctx).await.unwrap();
        handle::close(cs);
    });

    let (conn, peer) = tcp::accept(ls, &ctx).await.unwrap();
    assert_eq!(peer, tcp::peer_addr(conn).unwrap());
    bytestream::send(conn, b"ABC", &ctx).await.unwrap();
    let mut buf = [0u8; 3];
    bytestream::recv(conn, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"456");

    client.await.unwrap();
    handle::close(conn);
    handle::close(ls);
}

/// 静默连接上的接收在截止时间附近返回 `TimedOut`，且方向随即中毒。
#[tokio::test]
async fn recv_deadline_then_poisoned() {
    let ctx = CallContext::never();
    let ls = tcp::listen(loopback(), 10).unwrap();
    let addr = tcp::local_addr(ls).unwrap();

    let cs = tcp::connect(addr, &ctx).await.unwrap();
    let (conn, _) = tcp::accept(ls, &ctx).await.unwrap();

    let started = Instant::now();
    let mut buf = [0u8; 16];
    let err = bytestream::recv(
        conn,
        &mut buf,
        &CallContext::deadline_in(Duration::from_millis(30)),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(25), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "returned too late: {elapsed:?}");

    let err = bytestream::recv(conn, &mut buf, &ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionReset);

    handle::close(cs);
    handle::close(conn);
    handle::close(ls);
}

/// 手动终止握手：一端 `done` 之后另一端读到 `Pipe`，反向数据仍可流动。
#[tokio::test]
async fn manual_half_close_handshake() {
    let ctx = CallContext::never();
    let ls = tcp::listen(loopback(), 10).unwrap();
    let addr = tcp::local_addr(ls).unwrap();

    let client = tokio::spawn(async move {
        let ctx = CallContext::never();
        let cs = tcp::connect(addr, &ctx).await.unwrap();
        let mut buf = [0u8; 3];
        bytestream::recv(cs, &mut buf, &ctx).await.unwrap();
        assert_eq!(&buf, b"ABC");
        // 对端 FIN：干净 EOF 报 Pipe。
        let err = bytestream::recv(cs, &mut buf, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Pipe);
        bytestream::send(cs, b"DEF", &ctx).await.unwrap();
        tcp::stop(cs, &ctx).await.unwrap();
    });

    let (conn, _) = tcp::accept(ls, &ctx).await.unwrap();
    bytestream::send(conn, b"ABC", &ctx).await.unwrap();
    handle::done(conn, &ctx).await.unwrap();
    // 半关闭之后发送方向已结束。
    let err = bytestream::send(conn, b"x", &ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pipe);

    let mut buf = [0u8; 3];
    bytestream::recv(conn, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"DEF");
    let err = bytestream::recv(conn, &mut buf, &ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pipe);

    client.await.unwrap();
    handle::close(conn);
    handle::close(ls);
}

/// 双端同时 `stop`：两侧都应干净返回。
#[tokio::test]
async fn symmetric_stop() {
    let ctx = CallContext::never();
    let ls = tcp::listen(loopback(), 10).unwrap();
    let addr = tcp::local_addr(ls).unwrap();

    let client = tokio::spawn(async move {
        let ctx = CallContext::never();
        let cs = tcp::connect(addr, &ctx).await.unwrap();
        bytestream::send(cs, b"bye", &ctx).await.unwrap();
        tcp::stop(cs, &ctx).await.unwrap();
    });

    let (conn, _) = tcp::accept(ls, &ctx).await.unwrap();
    tcp::stop(conn, &ctx).await.unwrap();
    client.await.unwrap();
    handle::close(ls);
}

/// 推回：对端不读且中途关闭，持续发送最终报 `ConnectionReset`。
#[tokio::test]
async fn pushback_reports_reset() {
    let ctx = CallContext::never();
    let ls = tcp::listen(loopback(), 10).unwrap();
    let addr = tcp::local_addr(ls).unwrap();

    let client = tokio::spawn(async move {
        let ctx = CallContext::never();
        let cs = tcp::connect(addr, &ctx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // 不读任何数据直接放弃连接。
        handle::close(cs);
    });

    let (conn, _) = tcp::accept(ls, &ctx).await.unwrap();
    let chunk = [0u8; 2048];
    let err = loop {
        match bytestream::send(conn, &chunk, &ctx).await {
            Ok(()) => continue,
            Err(err) => break err,
        }
    };
    assert_eq!(err.kind(), ErrorKind::ConnectionReset);

    // 发送方向已中毒：优雅终止同样失败。
    let err = tcp::stop(conn, &ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionReset);

    client.await.unwrap();
    handle::close(ls);
}

/// 静止连接的拆解/接管是幂等的：拆出的裸流接回后行为不变。
#[tokio::test]
async fn detach_attach_round_trip() {
    let ctx = CallContext::never();
    let ls = tcp::listen(loopback(), 10).unwrap();
    let addr = tcp::local_addr(ls).unwrap();

    let cs = tcp::connect(addr, &ctx).await.unwrap();
    let (conn, _) = tcp::accept(ls, &ctx).await.unwrap();

    let raw = tcp::detach(cs).unwrap();
    let cs = tcp::attach(raw).unwrap();

    bytestream::send(cs, b"again", &ctx).await.unwrap();
    let mut buf = [0u8; 5];
    bytestream::recv(conn, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"again");

    handle::close(cs);
    handle::close(conn);
    handle::close(ls);
}
