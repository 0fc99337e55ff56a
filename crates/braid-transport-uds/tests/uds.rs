#![cfg(unix)]
//! UNIX 域传输端到端测试：套接字对、路径监听与路径长度校验。

use std::path::PathBuf;

use braid_core::context::CallContext;
use braid_core::error::ErrorKind;
use braid_core::{bytestream, handle};
use braid_transport_uds as uds;

fn scratch_path(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("braid-uds-{}-{}.sock", std::process::id(), tag));
    let _ = std::fs::remove_file(&path);
    path
}

/// 套接字对上的双向收发。
#[tokio::test]
async fn pair_round_trip() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();

    bytestream::send(a, b"ping", &ctx).await.unwrap();
    let mut buf = [0u8; 4];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"ping");

    bytestream::send(b, b"pong", &ctx).await.unwrap();
    bytestream::recv(a, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"pong");

    handle::close(a);
    handle::close(b);
}

/// 路径监听 + 建连 + 优雅终止。
#[tokio::test]
async fn listen_connect_stop() {
    let ctx = CallContext::never();
    let path = scratch_path("listen");
    let ls = uds::listen(&path, 10).unwrap();

    let client_path = path.clone();
    let client = tokio::spawn(async move {
        let ctx = CallContext::never();
        let cs = uds::connect(&client_path, &ctx).await.unwrap();
        bytestream::send(cs, b"hello", &ctx).await.unwrap();
        uds::stop(cs, &ctx).await.unwrap();
    });

    let conn = uds::accept(ls, &ctx).await.unwrap();
    let mut buf = [0u8; 5];
    bytestream::recv(conn, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"hello");
    uds::stop(conn, &ctx).await.unwrap();

    client.await.unwrap();
    handle::close(ls);
    let _ = std::fs::remove_file(&path);
}

/// 超长路径在触碰系统调用之前就被拒绝。
#[tokio::test]
async fn oversize_path_is_name_too_long() {
    let long = format!("/tmp/{}", "x".repeat(256));
    let err = uds::listen(&long, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameTooLong);

    let err = uds::connect(&long, &CallContext::never()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameTooLong);
}

/// 拆解/接管后的套接字对仍然可用。
#[tokio::test]
async fn detach_attach_round_trip() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();

    let raw = uds::detach(a).unwrap();
    let a = uds::attach(raw).unwrap();

    bytestream::send(a, b"still here", &ctx).await.unwrap();
    let mut buf = [0u8; 10];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"still here");

    handle::close(a);
    handle::close(b);
}
