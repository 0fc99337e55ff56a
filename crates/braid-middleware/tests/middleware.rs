#![cfg(unix)]
//! 直通层端到端测试：观测层保值、限流节奏与批量合并的三种冲刷路径。

use std::time::{Duration, Instant};

use braid_core::context::CallContext;
use braid_core::error::ErrorKind;
use braid_core::{bytestream, handle, message};
use braid_middleware::{Quota, nagle, throttle, trace};
use braid_transport_uds as uds;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// 叠层保值：穿过观测层的字节逐字节不变，摘除后下层句柄可用。
#[tokio::test]
async fn trace_is_value_preserving() {
    init_tracing();
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let traced = trace::attach(a).unwrap();

    bytestream::send_vectored(traced, &[b"tap ", b"this"], &ctx).await.unwrap();
    let mut buf = [0u8; 8];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"tap this");

    bytestream::send(b, b"back", &ctx).await.unwrap();
    let mut buf = [0u8; 4];
    bytestream::recv(traced, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"back");

    let lower = trace::detach(traced).unwrap();
    bytestream::send(lower, b"bare", &ctx).await.unwrap();
    let mut buf = [0u8; 4];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"bare");

    handle::close(lower);
    handle::close(b);
}

/// 字节限流：250 字节在每 100ms 重算 100 字节的配额下至少跨两个周期。
#[tokio::test]
async fn byte_throttle_paces_send() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let throttled =
        throttle::attach_bytes(a, Some(Quota::new(1000, Duration::from_millis(100))), None)
            .unwrap();

    let payload = [0x42u8; 250];
    let started = Instant::now();
    bytestream::send(throttled, &payload, &ctx).await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(120), "sent too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "sent too slowly: {elapsed:?}");

    let mut buf = vec![0u8; 250];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(buf, payload);

    handle::close(throttled);
    handle::close(b);
}

/// 配额耗尽 + 截止时间：挂起的发送以 `TimedOut` 结束并使方向中毒。
#[tokio::test]
async fn byte_throttle_deadline_poisons() {
    let (a, b) = uds::pair().unwrap();
    let throttled =
        throttle::attach_bytes(a, Some(Quota::new(10, Duration::from_millis(200))), None).unwrap();

    let payload = [0u8; 64];
    let err = bytestream::send(
        throttled,
        &payload,
        &CallContext::deadline_in(Duration::from_millis(40)),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    let err = bytestream::send(throttled, b"x", &CallContext::never()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionReset);

    handle::close(throttled);
    handle::close(b);
}

/// 零配额方向不限流：纯直通。
#[tokio::test]
async fn throttle_without_quota_is_transparent() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let throttled = throttle::attach_bytes(a, None, None).unwrap();

    bytestream::send(throttled, b"free", &ctx).await.unwrap();
    let mut buf = [0u8; 4];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"free");

    let lower = throttle::detach(throttled).unwrap();
    handle::close(lower);
    handle::close(b);
}

/// 消息限流：每周期一条，三条消息至少跨两个周期。
#[tokio::test]
async fn message_throttle_paces_messages() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let s0 = braid_codec_pfx::attach(a).unwrap();
    let s1 = braid_codec_pfx::attach(b).unwrap();
    let throttled =
        throttle::attach_messages(s0, Some(Quota::new(10, Duration::from_millis(100))), None)
            .unwrap();

    let started = Instant::now();
    message::send(throttled, b"one", &ctx).await.unwrap();
    message::send(throttled, b"two", &ctx).await.unwrap();
    message::send(throttled, b"three", &ctx).await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(120), "sent too fast: {elapsed:?}");

    let mut buf = [0u8; 8];
    for expect in [&b"one"[..], b"two", b"three"] {
        let n = message::recv(s1, &mut buf, &ctx).await.unwrap();
        assert_eq!(&buf[..n], expect);
    }

    handle::close(throttled);
    handle::close(s1);
}

/// 攒满 `batch` 字节立即合并写出（间隔被设到不可能触发）。
#[tokio::test]
async fn nagle_flushes_on_batch_size() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let batched = nagle::attach(a, 4, Duration::from_secs(600)).unwrap();

    let started = Instant::now();
    bytestream::send(batched, b"ab", &ctx).await.unwrap();
    bytestream::send(batched, b"cd", &ctx).await.unwrap();
    let mut buf = [0u8; 4];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"abcd");
    assert!(started.elapsed() < Duration::from_secs(5));

    handle::close(batched);
    handle::close(b);
}

/// 距首字节 `interval` 后由助手任务冲刷。
#[tokio::test]
async fn nagle_flushes_on_interval() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let batched = nagle::attach(a, 1024, Duration::from_millis(80)).unwrap();

    let started = Instant::now();
    bytestream::send(batched, b"tiny", &ctx).await.unwrap();
    let mut buf = [0u8; 4];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"tiny");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "flushed too early: {elapsed:?}");

    handle::close(batched);
    handle::close(b);
}

/// `done` 无条件冲刷并向下转发半关闭。
#[tokio::test]
async fn nagle_done_flushes_and_half_closes() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let batched = nagle::attach(a, 1024, Duration::from_secs(600)).unwrap();

    bytestream::send(batched, b"end", &ctx).await.unwrap();
    handle::done(batched, &ctx).await.unwrap();

    let mut buf = [0u8; 3];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"end");
    let err = bytestream::recv(b, &mut buf, &ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pipe);

    handle::close(batched);
    handle::close(b);
}

/// 摘除前冲刷残留批次，交还的下层句柄可用。
#[tokio::test]
async fn nagle_detach_flushes_pending() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let batched = nagle::attach(a, 1024, Duration::from_secs(600)).unwrap();

    bytestream::send(batched, b"go", &ctx).await.unwrap();
    let lower = nagle::detach(batched, &ctx).await.unwrap();

    let mut buf = [0u8; 2];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"go");

    bytestream::send(lower, b"on", &ctx).await.unwrap();
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"on");

    handle::close(lower);
    handle::close(b);
}

/// 组合栈：分帧层叠在观测层之上，消息往返保值，逐层摘除各归其位。
#[tokio::test]
async fn composed_stack_round_trip() {
    init_tracing();
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let ta = trace::attach(a).unwrap();
    let s0 = braid_codec_pfx::attach(ta).unwrap();
    let s1 = braid_codec_pfx::attach(b).unwrap();

    message::send(s0, b"layered", &ctx).await.unwrap();
    let mut buf = [0u8; 16];
    let n = message::recv(s1, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf[..n], b"layered");

    handle::done(s0, &ctx).await.unwrap();
    let err = message::recv(s1, &mut buf, &ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pipe);

    // 先让已观察到终止标记的一端摘除（它无需再等待对端），随后另一端
    // 的排空会读到它补发的终止标记。
    let s1_lower = braid_codec_pfx::detach(s1, &ctx).await.unwrap();
    // 分帧层摘除后交还的正是观测层句柄，再摘一次才露出裸传输。
    let traced = braid_codec_pfx::detach(s0, &ctx).await.unwrap();
    let lower = trace::detach(traced).unwrap();

    bytestream::send(lower, b"bare", &ctx).await.unwrap();
    let mut raw = [0u8; 4];
    bytestream::recv(s1_lower, &mut raw, &ctx).await.unwrap();
    assert_eq!(&raw, b"bare");

    handle::close(lower);
    handle::close(s1_lower);
}

/// 无条件关闭也会抢救残留批次（分离任务带宽限冲刷）。
#[tokio::test]
async fn nagle_close_salvages_pending() {
    let ctx = CallContext::never();
    let (a, b) = uds::pair().unwrap();
    let batched = nagle::attach(a, 1024, Duration::from_secs(600)).unwrap();

    bytestream::send(batched, b"bye", &ctx).await.unwrap();
    handle::close(batched);

    let mut buf = [0u8; 3];
    bytestream::recv(b, &mut buf, &ctx).await.unwrap();
    assert_eq!(&buf, b"bye");

    handle::close(b);
}
