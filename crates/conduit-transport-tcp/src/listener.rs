use async_trait::async_trait;
use conduit_core::{
    BufferPool, Connection, ConnectionListener, EndPoint, ListenerFactory, TransportError,
    TransportOptions, cancelled_error, map_io_error, unsupported_endpoint,
};
use tokio::{net::TcpListener, sync::RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{connector::establish, error};

/// 面向 [`EndPoint::Network`] 的监听工厂。
#[derive(Clone, Debug, Default)]
pub struct TcpListenerFactory {
    options: TransportOptions,
    pool: BufferPool,
}

impl TcpListenerFactory {
    pub fn new(options: TransportOptions, pool: BufferPool) -> Self {
        Self { options, pool }
    }
}

#[async_trait]
impl ListenerFactory for TcpListenerFactory {
    fn can_bind(&self, endpoint: &EndPoint) -> bool {
        matches!(endpoint, EndPoint::Network { .. })
    }

    async fn bind(&self, endpoint: &EndPoint) -> Result<Box<dyn ConnectionListener>, TransportError> {
        let EndPoint::Network { host, port } = endpoint else {
            return Err(unsupported_endpoint(error::BIND, endpoint));
        };
        let listener = TcpListener::bind((host.as_str(), *port))
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        let local = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        debug!(endpoint = %local, "tcp listener bound");
        Ok(Box::new(TcpConnectionListener {
            listener: RwLock::new(Some(listener)),
            endpoint: EndPoint::from(local),
            unbound: CancellationToken::new(),
            options: self.options.clone(),
            pool: self.pool.clone(),
        }))
    }
}

/// 已绑定的套接字监听器。
///
/// # 契约（What）
/// - `accept` 与 `unbind` 竞争时，`unbind` 先唤醒挂起的 `accept`（返回 `None`），再关闭监听套接字；
/// - `endpoint` 返回真实绑定地址，端口 0 绑定后可直接用于拨号。
#[derive(Debug)]
pub struct TcpConnectionListener {
    listener: RwLock<Option<TcpListener>>,
    endpoint: EndPoint,
    unbound: CancellationToken,
    options: TransportOptions,
    pool: BufferPool,
}

#[async_trait]
impl ConnectionListener for TcpConnectionListener {
    fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }

    async fn accept(&self, cancel: &CancellationToken) -> Result<Option<Connection>, TransportError> {
        let guard = self.listener.read().await;
        let Some(listener) = guard.as_ref() else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = self.unbound.cancelled() => Ok(None),
            _ = cancel.cancelled() => Err(cancelled_error(error::ACCEPT)),
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|err| map_io_error(error::ACCEPT, err))?;
                establish(stream, &self.options, &self.pool).map(Some)
            }
        }
    }

    async fn unbind(&self) {
        self.unbound.cancel();
        if self.listener.write().await.take().is_some() {
            debug!(endpoint = %self.endpoint, "tcp listener unbound");
        }
    }
}
