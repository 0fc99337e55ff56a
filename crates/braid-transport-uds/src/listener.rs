use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener as TokioUnixListener;
use tracing::debug;

use braid_core::context::{CallContext, run_with_context};
use braid_core::contract::SockObject;
use braid_core::error::{Result, map_io_error};
use braid_core::handle::{self, Handle};
use braid_transport::StreamConfig;
use braid_transport::tune;

use crate::channel;

mod ops {
    pub const LISTEN: &str = "uds.listen";
    pub const ACCEPT: &str = "uds.accept";
}

/// UNIX 域监听对象。路径对应的文件由调用方负责清理。
pub(crate) struct UdsListenerObject {
    inner: TokioUnixListener,
    path: PathBuf,
    config: StreamConfig,
}

impl SockObject for UdsListenerObject {
    fn kind(&self) -> &'static str {
        "uds.listener"
    }
}

/// 在给定路径上监听。
pub fn listen(path: impl AsRef<Path>, backlog: u32) -> Result<Handle> {
    listen_with_config(path, backlog, &StreamConfig::default())
}

/// 按给定配置监听。
pub fn listen_with_config(
    path: impl AsRef<Path>,
    backlog: u32,
    config: &StreamConfig,
) -> Result<Handle> {
    let path = path.as_ref();
    let addr = channel::resolve(path, ops::LISTEN)?;
    let std_listener =
        tune::bind_unix_listener(&addr, backlog).map_err(|err| map_io_error(ops::LISTEN, err))?;
    let listener =
        TokioUnixListener::from_std(std_listener).map_err(|err| map_io_error(ops::LISTEN, err))?;
    let h = handle::register(Arc::new(UdsListenerObject {
        inner: listener,
        path: path.to_path_buf(),
        config: config.clone(),
    }));
    debug!(target: "braid::uds", handle = %h, path = %path.display(), backlog, "listening");
    Ok(h)
}

/// 接受一个入站连接。
pub async fn accept(h: Handle, ctx: &CallContext) -> Result<Handle> {
    let listener = handle::control::<UdsListenerObject>(h, ops::ACCEPT)?;
    let (stream, _addr) = run_with_context(ctx, ops::ACCEPT, listener.inner.accept()).await?;
    debug!(target: "braid::uds", path = %listener.path.display(), "accepted");
    channel::register_stream(stream, &listener.config, ops::ACCEPT)
}
