use async_trait::async_trait;
use conduit_core::{
    BufferPool, Connection, ConnectionListener, EndPoint, ListenerFactory, TransportError,
    TransportOptions, UriAddress, cancelled_error, map_io_error, unsupported_endpoint,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::RwLock,
};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async_with_config,
    tungstenite::{
        self,
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    connector::{establish, is_plain_ws, protocol_config},
    error::{self, protocol_failure},
};

/// 面向 `ws://host:port/path` 的监听工厂。
#[derive(Clone, Debug, Default)]
pub struct WebSocketListenerFactory {
    options: TransportOptions,
    pool: BufferPool,
}

impl WebSocketListenerFactory {
    pub fn new(options: TransportOptions, pool: BufferPool) -> Self {
        Self { options, pool }
    }
}

#[async_trait]
impl ListenerFactory for WebSocketListenerFactory {
    fn can_bind(&self, endpoint: &EndPoint) -> bool {
        is_plain_ws(endpoint).is_some()
    }

    async fn bind(&self, endpoint: &EndPoint) -> Result<Box<dyn ConnectionListener>, TransportError> {
        let Some(uri) = is_plain_ws(endpoint) else {
            return Err(unsupported_endpoint(error::BIND, endpoint));
        };
        let port = uri.port().unwrap_or(80);
        let listener = TcpListener::bind((uri.host(), port))
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        let local = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        let path = uri.path().split(['?', '#']).next().unwrap_or("/").to_owned();
        let bound = UriAddress::parse(format!("ws://{local}{path}"))?;
        debug!(endpoint = %bound, "websocket listener bound");
        Ok(Box::new(WebSocketConnectionListener {
            listener: RwLock::new(Some(listener)),
            endpoint: EndPoint::Uri(bound),
            path,
            unbound: CancellationToken::new(),
            options: self.options.clone(),
            pool: self.pool.clone(),
        }))
    }
}

/// 已绑定的 WebSocket 监听器。
///
/// # 契约（What）
/// - 每次 `accept` 循环接受 TCP 连接并完成 HTTP 升级，直到得到一个可用连接；
///   单个客户端的升级失败（路径不符、请求非法、超时）只记录告警，不会终止监听；
/// - 请求路径必须与绑定路径一致，否则以 404 拒绝升级；
/// - `unbind` 唤醒挂起的 `accept` 并返回 `None`，进行中的升级随之放弃。
#[derive(Debug)]
pub struct WebSocketConnectionListener {
    listener: RwLock<Option<TcpListener>>,
    endpoint: EndPoint,
    path: String,
    unbound: CancellationToken,
    options: TransportOptions,
    pool: BufferPool,
}

impl WebSocketConnectionListener {
    async fn upgrade(&self, tcp: TcpStream) -> Result<WebSocketStream<TcpStream>, TransportError> {
        let expected = self.path.as_str();
        let check_path = |request: &Request, response: Response| {
            if request.uri().path() == expected {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some(format!(
                    "no websocket endpoint at {}",
                    request.uri().path()
                )));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };
        match tokio::time::timeout(
            self.options.websocket.handshake_timeout(),
            accept_hdr_async_with_config(tcp, check_path, Some(protocol_config(&self.options))),
        )
        .await
        {
            Ok(result) => result.map_err(|err: tungstenite::Error| protocol_failure(error::ACCEPT, err)),
            Err(_) => Err(conduit_core::timeout_error(error::ACCEPT)),
        }
    }
}

#[async_trait]
impl ConnectionListener for WebSocketConnectionListener {
    fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }

    async fn accept(&self, cancel: &CancellationToken) -> Result<Option<Connection>, TransportError> {
        let guard = self.listener.read().await;
        let Some(listener) = guard.as_ref() else {
            return Ok(None);
        };
        loop {
            let attempt = async {
                let (tcp, peer) = listener
                    .accept()
                    .await
                    .map_err(|err| map_io_error(error::ACCEPT, err))?;
                if let Err(err) = tcp.set_nodelay(self.options.socket.nodelay) {
                    debug!(error = %err, "websocket nodelay not applied");
                }
                let local = tcp.local_addr().ok().map(EndPoint::from);
                match self.upgrade(tcp).await {
                    Ok(socket) => Ok::<_, TransportError>(Some((socket, local, EndPoint::from(peer)))),
                    Err(err) => {
                        warn!(peer = %peer, error = %err, "websocket upgrade failed");
                        Ok(None)
                    }
                }
            };
            let upgraded = tokio::select! {
                biased;
                _ = self.unbound.cancelled() => return Ok(None),
                _ = cancel.cancelled() => return Err(cancelled_error(error::ACCEPT)),
                upgraded = attempt => upgraded?,
            };
            if let Some((socket, local, remote)) = upgraded {
                let connection = establish(socket, local, Some(remote), &self.options, &self.pool);
                debug!(connection = %connection.id(), "websocket accepted");
                return Ok(Some(connection));
            }
        }
    }

    async fn unbind(&self) {
        self.unbound.cancel();
        if self.listener.write().await.take().is_some() {
            debug!(endpoint = %self.endpoint, "websocket listener unbound");
        }
    }
}
