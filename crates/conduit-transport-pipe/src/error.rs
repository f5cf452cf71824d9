use std::io;

use conduit_core::{ErrorKind, OperationKind, StreamOperations, TransportError, map_io_error};

pub(crate) const CONNECT: OperationKind =
    OperationKind::new("conduit.pipe.connect_failed", "pipe connect");
pub(crate) const BIND: OperationKind = OperationKind::new("conduit.pipe.bind_failed", "pipe bind");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("conduit.pipe.accept_failed", "pipe accept");

pub(crate) const STREAM: StreamOperations = StreamOperations {
    read: OperationKind::new("conduit.pipe.read_failed", "pipe read"),
    write: OperationKind::new("conduit.pipe.write_failed", "pipe write"),
    shutdown: OperationKind::new("conduit.pipe.shutdown_failed", "pipe shutdown"),
};

/// `ERROR_BROKEN_PIPE`
const BROKEN_PIPE: i32 = 109;
/// `ERROR_NO_DATA`：管道正在关闭。
const NO_DATA: i32 = 232;
/// `ERROR_PIPE_NOT_CONNECTED`
const PIPE_NOT_CONNECTED: i32 = 233;

/// 管道读写的错误分类：对端断开的系统错误码一律视为对端离开。
pub(crate) fn map_pipe_error(kind: OperationKind, error: io::Error) -> TransportError {
    if cfg!(windows)
        && matches!(
            error.raw_os_error(),
            Some(BROKEN_PIPE | NO_DATA | PIPE_NOT_CONNECTED)
        )
    {
        return TransportError::new(
            ErrorKind::TransportAborted,
            kind.code,
            format!("{}: peer disconnected", kind.message),
        )
        .with_cause(error);
    }
    map_io_error(kind, error)
}
