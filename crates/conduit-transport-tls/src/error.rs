//! TLS 错误映射。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手与记录层的失败可能来自三处：内层连接（经 `ChannelStream` 以 `io::Error` 隧穿）、
//!   `rustls` 协议错误、以及普通 IO；三者需要落到同一套 [`ErrorKind`]；
//! - 内层错误必须原样还原，否则 TLS 之上的应用看不到真实的终止原因。
//!
//! ## 契约（What）
//! - 握手阶段：内层原始错误优先还原；其余一律为 `ProtocolFailure`；
//! - 记录层：`rustls` 错误为 `ProtocolFailure`；对端未发送 `close_notify` 就断开视为
//!   `TransportAborted`；其余交给核心的 [`map_io_error`]。

use std::io;

use conduit_core::{
    ErrorKind, OperationKind, StreamOperations, TransportError, map_io_error, recover_io_error,
};
use rustls::Error as RustlsError;

pub(crate) const HANDSHAKE: OperationKind =
    OperationKind::new("conduit.tls.handshake_failed", "tls handshake");

pub(crate) const STREAM: StreamOperations = StreamOperations {
    read: OperationKind::new("conduit.tls.read_failed", "tls read"),
    write: OperationKind::new("conduit.tls.write_failed", "tls write"),
    shutdown: OperationKind::new("conduit.tls.shutdown_failed", "tls shutdown"),
};

pub(crate) fn map_handshake_error(kind: OperationKind, error: io::Error) -> TransportError {
    if let Some(original) = recover_io_error(&error) {
        return original;
    }
    TransportError::new(
        ErrorKind::ProtocolFailure,
        kind.code,
        format!("{}: {}", kind.message, error),
    )
    .with_cause(error)
}

pub(crate) fn map_stream_error(kind: OperationKind, error: io::Error) -> TransportError {
    if rustls_cause(&error).is_some() {
        return TransportError::new(
            ErrorKind::ProtocolFailure,
            kind.code,
            format!("{}: {}", kind.message, error),
        )
        .with_cause(error);
    }
    if error.kind() == io::ErrorKind::UnexpectedEof && recover_io_error(&error).is_none() {
        return TransportError::new(
            ErrorKind::TransportAborted,
            kind.code,
            format!("{}: peer closed without close_notify", kind.message),
        )
        .with_cause(error);
    }
    map_io_error(kind, error)
}

pub(crate) fn invalid_server_name(name: &str) -> TransportError {
    TransportError::new(
        ErrorKind::InvalidEndpoint,
        "conduit.tls.invalid_server_name",
        format!("`{name}` is not a valid tls server name"),
    )
}

fn rustls_cause(error: &io::Error) -> Option<&RustlsError> {
    error.get_ref()?.downcast_ref::<RustlsError>()
}
