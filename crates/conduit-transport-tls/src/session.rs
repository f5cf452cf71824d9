use std::sync::Arc;

use conduit_core::{BufferPool, Connection, StreamTransport, TransportOptions};
use rustls::{CipherSuite, ProtocolVersion};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{self, map_stream_error};

/// 握手协商结果，作为能力标注挂在 TLS 连接上。
#[derive(Clone, Debug, PartialEq)]
pub struct TlsInfo {
    /// 客户端为拨号时使用的名称；服务端为客户端发送的 SNI。
    pub server_name: Option<String>,
    pub alpn_protocol: Option<Vec<u8>>,
    pub protocol_version: Option<ProtocolVersion>,
    pub cipher_suite: Option<CipherSuite>,
}

impl TlsInfo {
    pub(crate) fn from_common(
        server_name: Option<String>,
        common: &rustls::CommonState,
    ) -> Self {
        Self {
            server_name,
            alpn_protocol: common.alpn_protocol().map(<[u8]>::to_vec),
            protocol_version: common.protocol_version(),
            cipher_suite: common.negotiated_cipher_suite().map(|suite| suite.suite()),
        }
    }
}

/// 把握手完成的 TLS 流包装为新的连接。
///
/// # 契约（What）
/// - 新连接沿用内层的标识与端点，继承内层全部能力标注并追加 [`TlsInfo`]；
/// - 内层连接交由外层原生句柄持有：外层释放时先发送 `close_notify`，再释放内层；
/// - 内层结束表现为 TLS 流读到 EOF 或错误，外层随之结束。
pub(crate) fn wrap_session<S>(
    stream: S,
    inner: Connection,
    info: TlsInfo,
    options: &TransportOptions,
    pool: &BufferPool,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = inner.id();
    let local = inner.local_endpoint().cloned();
    let remote = inner.remote_endpoint().cloned();
    let mut properties = inner.properties().clone();
    debug!(
        connection = %id,
        version = ?info.protocol_version,
        server_name = ?info.server_name,
        "tls session established"
    );
    properties.insert(info);

    let raw = StreamTransport::new("tls", stream, error::STREAM)
        .with_error_mapper(map_stream_error)
        .with_inner(inner);
    Connection::builder(Arc::new(raw))
        .id(id)
        .local(local)
        .remote(remote)
        .properties(properties)
        .options(options)
        .pool(pool.clone())
        .start()
}
