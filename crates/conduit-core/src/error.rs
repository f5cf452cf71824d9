use std::{borrow::Cow, error::Error as StdError, fmt, io, sync::Arc};

/// 传输层错误分类。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 各传输实现（套接字、命名管道、WebSocket、TLS）的原生错误表示差异巨大，上层框架只应看到
///   一套稳定分类，才能统一决定“优雅结束 / 取消 / 致命失败”；
/// - 分类在适配器边界完成，之后不再泄露任何传输特有的错误类型。
///
/// ## 契约（What）
/// - `GracefulEof` 与 `TransportAborted` 属于“非错误”的终止，泵循环会把它们视为干净结束；
/// - `Cancelled`、`ConnectTimeout`、`ConnectRefused`、`UnsupportedEndpoint`、`InvalidEndpoint`
///   只出现在建连阶段；
/// - `IoFailure`/`ProtocolFailure` 是需要暴露给应用的致命错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 对端正常关闭。
    GracefulEof,
    /// 调用方提供的取消令牌已触发。
    Cancelled,
    /// 截止时间内没有可达的监听方。
    ConnectTimeout,
    /// 对端拒绝连接。
    ConnectRefused,
    /// 当前工厂无法处理该端点类型。
    UnsupportedEndpoint,
    /// 端点描述本身非法（例如保留管道名）。
    InvalidEndpoint,
    /// 句柄被本地关闭；对泵循环而言等价于优雅结束。
    TransportAborted,
    /// 未归类的 IO 失败。
    IoFailure,
    /// 中间件层失败，例如安全握手失败。
    ProtocolFailure,
}

impl ErrorKind {
    /// 是否属于“干净结束”。
    pub fn is_graceful(self) -> bool {
        matches!(self, ErrorKind::GracefulEof | ErrorKind::TransportAborted)
    }

    /// 供日志使用的短标签。
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::GracefulEof => "graceful_eof",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::ConnectRefused => "connect_refused",
            ErrorKind::UnsupportedEndpoint => "unsupported_endpoint",
            ErrorKind::InvalidEndpoint => "invalid_endpoint",
            ErrorKind::TransportAborted => "transport_aborted",
            ErrorKind::IoFailure => "io_failure",
            ErrorKind::ProtocolFailure => "protocol_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// 传输层统一错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 与核心错误一样携带“稳定错误码 + 人类可读文案 + 分类”，使运维脚本无需解析底层库细节；
/// - 同一个终止错误需要同时交给通道完成信号与生命周期记录，因此错误必须可克隆，底层原因
///   通过 `Arc` 共享。
///
/// ## 契约（What）
/// - `code` 遵循 `conduit.<领域>.<语义>` 约定；
/// - `kind` 为 [`ErrorKind`] 分类；
/// - `source()` 返回原始底层错误（若有）。
#[derive(Clone, Debug, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct TransportError {
    kind: ErrorKind,
    code: &'static str,
    message: Cow<'static, str>,
    #[source]
    cause: Option<Cause>,
}

impl TransportError {
    /// 构造错误。
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// 附加底层原因。
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let cause: Cause = Arc::new(cause);
        self.cause = Some(cause);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 是否属于“干净结束”。
    pub fn is_graceful(&self) -> bool {
        self.kind.is_graceful()
    }

    /// 写入已完成的通道时返回的错误。
    pub(crate) fn write_after_complete() -> Self {
        Self::new(
            ErrorKind::IoFailure,
            "conduit.channel.write_after_complete",
            "channel writer already completed",
        )
    }

    /// 消费方已离开时写入方观察到的默认原因。
    pub(crate) fn reader_completed() -> Self {
        Self::new(
            ErrorKind::TransportAborted,
            "conduit.channel.reader_completed",
            "channel reader completed",
        )
    }
}

/// 让通道错误可以穿过 `AsyncRead`/`AsyncWrite` 视图，并在另一端通过 [`recover_io_error`] 还原。
impl From<TransportError> for io::Error {
    fn from(error: TransportError) -> Self {
        let kind = match error.kind {
            ErrorKind::GracefulEof => io::ErrorKind::UnexpectedEof,
            ErrorKind::TransportAborted => io::ErrorKind::ConnectionAborted,
            ErrorKind::Cancelled => io::ErrorKind::Interrupted,
            ErrorKind::ConnectTimeout => io::ErrorKind::TimedOut,
            ErrorKind::ConnectRefused => io::ErrorKind::ConnectionRefused,
            ErrorKind::UnsupportedEndpoint => io::ErrorKind::Unsupported,
            ErrorKind::InvalidEndpoint => io::ErrorKind::InvalidInput,
            ErrorKind::IoFailure | ErrorKind::ProtocolFailure => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}

/// 若 `io::Error` 内部包裹的是 [`TransportError`]，取回原始分类。
pub fn recover_io_error(error: &io::Error) -> Option<TransportError> {
    error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<TransportError>())
        .cloned()
}

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

impl OperationKind {
    pub const fn new(code: &'static str, message: &'static str) -> Self {
        Self { code, message }
    }
}

/// 将运行期 IO 错误映射为分类后的 [`TransportError`]。
///
/// 连接被重置、中止或管道断开都视为对端离开（`TransportAborted`），其余错误一律致命。
pub fn map_io_error(kind: OperationKind, error: io::Error) -> TransportError {
    if let Some(original) = recover_io_error(&error) {
        return original;
    }
    let category = categorize_io_error(&error);
    TransportError::new(category, kind.code, format!("{}: {}", kind.message, error)).with_cause(error)
}

/// 建连阶段的 IO 错误映射，超时与拒绝有独立分类。
pub fn map_connect_error(kind: OperationKind, error: io::Error) -> TransportError {
    if let Some(original) = recover_io_error(&error) {
        return original;
    }
    let category = match error.kind() {
        io::ErrorKind::TimedOut => ErrorKind::ConnectTimeout,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::PermissionDenied => {
            ErrorKind::ConnectRefused
        }
        io::ErrorKind::Unsupported => ErrorKind::UnsupportedEndpoint,
        io::ErrorKind::InvalidInput => ErrorKind::InvalidEndpoint,
        _ => ErrorKind::IoFailure,
    };
    TransportError::new(category, kind.code, format!("{}: {}", kind.message, error)).with_cause(error)
}

/// 构造取消错误。
pub fn cancelled_error(kind: OperationKind) -> TransportError {
    TransportError::new(
        ErrorKind::Cancelled,
        "conduit.transport.cancelled",
        format!("{} cancelled", kind.message),
    )
}

/// 构造建连超时错误。
pub fn timeout_error(kind: OperationKind) -> TransportError {
    TransportError::new(
        ErrorKind::ConnectTimeout,
        "conduit.transport.timeout",
        format!("{} timed out", kind.message),
    )
}

/// 构造端点不受支持的错误。
pub fn unsupported_endpoint(kind: OperationKind, endpoint: impl fmt::Display) -> TransportError {
    TransportError::new(
        ErrorKind::UnsupportedEndpoint,
        "conduit.transport.unsupported_endpoint",
        format!("{}: {} is not supported", kind.message, endpoint),
    )
}

fn categorize_io_error(error: &io::Error) -> ErrorKind {
    use io::ErrorKind as Io;
    match error.kind() {
        Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe | Io::NotConnected => {
            ErrorKind::TransportAborted
        }
        Io::UnexpectedEof => ErrorKind::GracefulEof,
        _ => ErrorKind::IoFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ: OperationKind = OperationKind::new("conduit.test.read_failed", "test read");

    #[test]
    fn reset_is_graceful_but_other_errors_are_fatal() {
        let reset = map_io_error(READ, io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(reset.kind(), ErrorKind::TransportAborted);
        assert!(reset.is_graceful());

        let denied = map_io_error(READ, io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.kind(), ErrorKind::IoFailure);
        assert!(!denied.is_graceful());
        assert_eq!(denied.code(), "conduit.test.read_failed");
    }

    #[test]
    fn transport_error_survives_io_round_trip() {
        let original = TransportError::new(ErrorKind::ProtocolFailure, "conduit.test.proto", "bad");
        let io_error: io::Error = original.clone().into();
        let recovered = map_io_error(READ, io_error);
        assert_eq!(recovered.kind(), ErrorKind::ProtocolFailure);
        assert_eq!(recovered.code(), "conduit.test.proto");
    }

    #[test]
    fn connect_errors_keep_dedicated_categories() {
        let refused = map_connect_error(READ, io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(refused.kind(), ErrorKind::ConnectRefused);
        let timeout = map_connect_error(READ, io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(timeout.kind(), ErrorKind::ConnectTimeout);
    }
}
