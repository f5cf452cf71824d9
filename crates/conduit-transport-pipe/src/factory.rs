use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{
    BufferPool, Clock, Connection, ConnectionFactory, ConnectionListener, EndPoint,
    ListenerFactory, PipeAddress, StreamTransport, SystemClock, TransportError, TransportOptions,
    cancelled_error, unsupported_endpoint,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::RwLock,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    connect::PipeConnector,
    error::{self, map_pipe_error},
    platform::{self, PlatformListener, PlatformOpener},
};

/// 面向 [`EndPoint::Pipe`] 的建连工厂。
///
/// # 契约（What）
/// - 重试节奏取自 [`TransportOptions::pipe`]：`connect_timeout_ms` 为总时限，`poll_quantum_ms`
///   为两次尝试之间的等待；
/// - 建连成功后以 [`StreamTransport`] 承载字节流，远端端点即拨号地址，本地端点留空。
#[derive(Clone)]
pub struct PipeConnectionFactory {
    options: TransportOptions,
    pool: BufferPool,
    clock: Arc<dyn Clock>,
}

impl PipeConnectionFactory {
    pub fn new(options: TransportOptions, pool: BufferPool) -> Self {
        Self {
            options,
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// 替换重试使用的时钟。
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for PipeConnectionFactory {
    fn default() -> Self {
        Self::new(TransportOptions::default(), BufferPool::default())
    }
}

impl std::fmt::Debug for PipeConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeConnectionFactory")
            .field("pipe", &self.options.pipe)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionFactory for PipeConnectionFactory {
    fn supports(&self, endpoint: &EndPoint) -> bool {
        matches!(endpoint, EndPoint::Pipe(_))
    }

    async fn connect(
        &self,
        endpoint: &EndPoint,
        cancel: &CancellationToken,
    ) -> Result<Connection, TransportError> {
        let EndPoint::Pipe(address) = endpoint else {
            return Err(unsupported_endpoint(error::CONNECT, endpoint));
        };
        platform::check_supported(address)?;
        let connector = PipeConnector::new(
            PlatformOpener,
            self.options.pipe.connect_timeout(),
            self.options.pipe.poll_quantum(),
        )
        .with_clock(self.clock.clone());
        let stream = connector.connect(address, cancel).await?;
        let connection = establish(stream, address, &self.options, &self.pool);
        debug!(connection = %connection.id(), pipe = %address, "pipe connected");
        Ok(connection)
    }
}

/// 面向 [`EndPoint::Pipe`] 的监听工厂。
#[derive(Clone, Debug, Default)]
pub struct PipeListenerFactory {
    options: TransportOptions,
    pool: BufferPool,
}

impl PipeListenerFactory {
    pub fn new(options: TransportOptions, pool: BufferPool) -> Self {
        Self { options, pool }
    }
}

#[async_trait]
impl ListenerFactory for PipeListenerFactory {
    fn can_bind(&self, endpoint: &EndPoint) -> bool {
        matches!(endpoint, EndPoint::Pipe(_))
    }

    async fn bind(&self, endpoint: &EndPoint) -> Result<Box<dyn ConnectionListener>, TransportError> {
        let EndPoint::Pipe(address) = endpoint else {
            return Err(unsupported_endpoint(error::BIND, endpoint));
        };
        let listener = PlatformListener::bind(address)?;
        debug!(pipe = %address, "pipe listener bound");
        Ok(Box::new(PipeConnectionListener {
            listener: RwLock::new(Some(listener)),
            address: address.clone(),
            endpoint: endpoint.clone(),
            unbound: CancellationToken::new(),
            options: self.options.clone(),
            pool: self.pool.clone(),
        }))
    }
}

/// 已绑定的命名管道监听器，语义与套接字监听器一致：`unbind` 唤醒挂起的 `accept` 并返回 `None`。
#[derive(Debug)]
pub struct PipeConnectionListener {
    listener: RwLock<Option<PlatformListener>>,
    address: PipeAddress,
    endpoint: EndPoint,
    unbound: CancellationToken,
    options: TransportOptions,
    pool: BufferPool,
}

#[async_trait]
impl ConnectionListener for PipeConnectionListener {
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
                let connection = establish(accepted?, &self.address, &self.options, &self.pool);
                debug!(connection = %connection.id(), pipe = %self.address, "pipe accepted");
                Ok(Some(connection))
            }
        }
    }

    async fn unbind(&self) {
        self.unbound.cancel();
        if self.listener.write().await.take().is_some() {
            debug!(pipe = %self.address, "pipe listener unbound");
        }
    }
}

fn establish<S>(
    stream: S,
    address: &PipeAddress,
    options: &TransportOptions,
    pool: &BufferPool,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let raw = StreamTransport::new("pipe", stream, error::STREAM).with_error_mapper(map_pipe_error);
    Connection::builder(Arc::new(raw))
        .remote(Some(EndPoint::Pipe(address.clone())))
        .options(options)
        .pool(pool.clone())
        .start()
}
