use conduit_core::{
    ErrorKind, OperationKind, TransportError, map_connect_error, map_io_error,
};
use tokio_tungstenite::tungstenite::{
    Error as WsError,
    error::{CapacityError, ProtocolError},
};

pub(crate) const CONNECT: OperationKind =
    OperationKind::new("conduit.websocket.connect_failed", "websocket connect");
pub(crate) const BIND: OperationKind =
    OperationKind::new("conduit.websocket.bind_failed", "websocket bind");
pub(crate) const ACCEPT: OperationKind =
    OperationKind::new("conduit.websocket.accept_failed", "websocket accept");
pub(crate) const READ: OperationKind =
    OperationKind::new("conduit.websocket.read_failed", "websocket read");
pub(crate) const WRITE: OperationKind =
    OperationKind::new("conduit.websocket.write_failed", "websocket write");

/// 读写阶段的错误分类。
///
/// 对端未完成关闭握手就断开属于“对端离开”，超限消息与协议违例属于 `ProtocolFailure`。
pub(crate) fn map_ws_error(kind: OperationKind, error: WsError) -> TransportError {
    match error {
        WsError::Io(io) => map_io_error(kind, io),
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => TransportError::new(
            ErrorKind::TransportAborted,
            kind.code,
            format!("{}: connection closed", kind.message),
        ),
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            message_too_large(size, max_size)
        }
        other => protocol_failure(kind, other),
    }
}

/// 建连阶段的错误分类：HTTP 层拒绝升级视为 `ConnectRefused`，URL 不合法视为 `InvalidEndpoint`。
pub(crate) fn map_ws_connect_error(error: WsError) -> TransportError {
    match error {
        WsError::Io(io) => map_connect_error(CONNECT, io),
        WsError::Http(response) => TransportError::new(
            ErrorKind::ConnectRefused,
            CONNECT.code,
            format!("{}: upgrade rejected with {}", CONNECT.message, response.status()),
        ),
        WsError::Url(url) => TransportError::new(
            ErrorKind::InvalidEndpoint,
            CONNECT.code,
            format!("{}: {url}", CONNECT.message),
        )
        .with_cause(url),
        other => protocol_failure(CONNECT, other),
    }
}

pub(crate) fn protocol_failure(kind: OperationKind, error: WsError) -> TransportError {
    TransportError::new(
        ErrorKind::ProtocolFailure,
        kind.code,
        format!("{}: {}", kind.message, error),
    )
    .with_cause(error)
}

pub(crate) fn message_too_large(size: usize, limit: usize) -> TransportError {
    TransportError::new(
        ErrorKind::ProtocolFailure,
        "conduit.websocket.message_too_large",
        format!("websocket message of {size} bytes exceeds limit of {limit} bytes"),
    )
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn closed_connections_are_graceful() {
        let err = map_ws_error(READ, WsError::ConnectionClosed);
        assert_eq!(err.kind(), ErrorKind::TransportAborted);
        let err = map_ws_error(
            READ,
            WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake),
        );
        assert!(err.is_graceful());
    }

    #[test]
    fn io_errors_use_core_classification() {
        let reset = WsError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(map_ws_error(WRITE, reset).kind(), ErrorKind::TransportAborted);
        let refused = WsError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(map_ws_connect_error(refused).kind(), ErrorKind::ConnectRefused);
    }

    #[test]
    fn oversized_message_is_protocol_failure() {
        let err = message_too_large(10, 4);
        assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
        assert!(!err.is_graceful());

        let capacity = WsError::Capacity(CapacityError::MessageTooLong {
            size: 10,
            max_size: 4,
        });
        let err = map_ws_error(READ, capacity);
        assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
        assert_eq!(err.code(), "conduit.websocket.message_too_large");
    }
}
