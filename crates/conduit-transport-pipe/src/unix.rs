//! 类 Unix 平台：命名管道映射为临时目录下的 Unix 域套接字。

use std::{io, path::PathBuf};

use async_trait::async_trait;
use conduit_core::{PipeAddress, TransportError, map_io_error, unsupported_endpoint};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use crate::{
    connect::{Attempt, PipeOpener},
    error,
};

pub(crate) type ClientStream = UnixStream;
pub(crate) type ServerStream = UnixStream;

/// 管道名到套接字文件的映射：`$TMPDIR/conduit-pipe-<name>`。
pub fn socket_path(address: &PipeAddress) -> PathBuf {
    std::env::temp_dir().join(format!("conduit-pipe-{}", address.pipe_name()))
}

/// 域套接字只能访问本机，远端服务器名在建连前即被拒绝。
pub(crate) fn check_supported(address: &PipeAddress) -> Result<(), TransportError> {
    if address.is_local() {
        Ok(())
    } else {
        Err(unsupported_endpoint(error::CONNECT, address))
    }
}

/// 文件不存在、无人监听或监听队列已满（`EAGAIN`）都视为服务端尚未就绪。
fn is_not_ready(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused | io::ErrorKind::WouldBlock
    )
}

/// 单次尝试连接域套接字。
#[derive(Clone, Copy, Debug, Default)]
pub struct PlatformOpener;

#[async_trait]
impl PipeOpener for PlatformOpener {
    type Stream = ClientStream;

    async fn try_open(&self, address: &PipeAddress) -> Attempt<ClientStream> {
        match UnixStream::connect(socket_path(address)).await {
            Ok(stream) => Attempt::Ready(stream),
            Err(err) if is_not_ready(&err) => Attempt::NotReady,
            Err(err) => Attempt::Failed(err),
        }
    }
}

/// 已绑定的服务端套接字；Drop 时删除套接字文件。
#[derive(Debug)]
pub(crate) struct PlatformListener {
    listener: UnixListener,
    path: PathBuf,
}

impl PlatformListener {
    pub(crate) fn bind(address: &PipeAddress) -> Result<Self, TransportError> {
        if !address.is_local() {
            return Err(unsupported_endpoint(error::BIND, address));
        }
        let path = socket_path(address);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale pipe socket"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(map_io_error(error::BIND, err)),
        }
        let listener = UnixListener::bind(&path).map_err(|err| map_io_error(error::BIND, err))?;
        Ok(Self { listener, path })
    }

    pub(crate) async fn accept(&self) -> Result<ServerStream, TransportError> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|err| map_io_error(error::ACCEPT, err))?;
        Ok(stream)
    }
}

impl Drop for PlatformListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_backlog_is_retryable() {
        for kind in [
            io::ErrorKind::NotFound,
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::WouldBlock,
        ] {
            assert!(is_not_ready(&io::Error::from(kind)), "{kind:?}");
        }
        assert!(!is_not_ready(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
