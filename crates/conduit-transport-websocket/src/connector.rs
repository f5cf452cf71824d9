use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{
    BufferPool, Connection, ConnectionFactory, EndPoint, InherentKeepAlive, TransportError,
    TransportOptions, UriAddress, cancelled_error, unsupported_endpoint,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::protocol::WebSocketConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{self, map_ws_connect_error},
    transport::WebSocketTransport,
};

/// 面向 `ws://` URI 端点的建连工厂。
///
/// # 契约（What）
/// - 只接受 scheme 为 `ws` 的 [`EndPoint::Uri`]；`wss` 需要在明文连接之上自行叠加 TLS 中间件；
/// - 握手被取消时返回 `Cancelled`，HTTP 层拒绝升级返回 `ConnectRefused`；
/// - 产出的连接携带 [`InherentKeepAlive`]`(true)`：WebSocket 自带 ping/pong。
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnectionFactory {
    options: TransportOptions,
    pool: BufferPool,
}

impl WebSocketConnectionFactory {
    pub fn new(options: TransportOptions, pool: BufferPool) -> Self {
        Self { options, pool }
    }
}

/// 协议库层面的消息与帧上限，超限的帧在头部解析时即被拒绝，不会先缓冲整条消息。
pub(crate) fn protocol_config(options: &TransportOptions) -> WebSocketConfig {
    let limit = options.websocket.max_message_size;
    WebSocketConfig::default()
        .max_message_size(Some(limit))
        .max_frame_size(Some(limit))
}

pub(crate) fn is_plain_ws(endpoint: &EndPoint) -> Option<&UriAddress> {
    match endpoint {
        EndPoint::Uri(uri) if uri.scheme() == "ws" => Some(uri),
        _ => None,
    }
}

#[async_trait]
impl ConnectionFactory for WebSocketConnectionFactory {
    fn supports(&self, endpoint: &EndPoint) -> bool {
        is_plain_ws(endpoint).is_some()
    }

    async fn connect(
        &self,
        endpoint: &EndPoint,
        cancel: &CancellationToken,
    ) -> Result<Connection, TransportError> {
        let Some(uri) = is_plain_ws(endpoint) else {
            return Err(unsupported_endpoint(error::CONNECT, endpoint));
        };
        if cancel.is_cancelled() {
            return Err(cancelled_error(error::CONNECT));
        }
        debug!(endpoint = %uri, "websocket connecting");
        let (socket, _response) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled_error(error::CONNECT)),
            result = connect_async_with_config(
                uri.as_str(),
                Some(protocol_config(&self.options)),
                self.options.socket.nodelay,
            ) => result.map_err(map_ws_connect_error)?,
        };

        let local = match socket.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp.local_addr().ok().map(EndPoint::from),
            _ => None,
        };
        let connection = establish(socket, local, Some(endpoint.clone()), &self.options, &self.pool);
        debug!(connection = %connection.id(), endpoint = %uri, "websocket connected");
        Ok(connection)
    }
}

pub(crate) fn establish<S>(
    socket: WebSocketStream<S>,
    local: Option<EndPoint>,
    remote: Option<EndPoint>,
    options: &TransportOptions,
    pool: &BufferPool,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let raw = WebSocketTransport::new(socket, options.websocket.max_message_size);
    Connection::builder(Arc::new(raw))
        .local(local)
        .remote(remote)
        .property(InherentKeepAlive(true))
        .options(options)
        .pool(pool.clone())
        .start()
}
