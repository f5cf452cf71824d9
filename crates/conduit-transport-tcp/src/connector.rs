use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{
    BufferPool, Connection, ConnectionFactory, EndPoint, TransportError, TransportOptions,
    map_connect_error, map_io_error, run_cancellable, unsupported_endpoint,
};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{error, transport::TcpTransport};

/// 面向 [`EndPoint::Network`] 的建连工厂。
///
/// # 契约（What）
/// - 主机名由 Tokio 解析，多个地址依次尝试；
/// - 建连失败分类：拒绝 → `ConnectRefused`，超时 → `ConnectTimeout`，取消 → `Cancelled`；
/// - 成功后按 [`TransportOptions::socket`] 配置 `TCP_NODELAY`，并返回已启动的连接。
#[derive(Clone, Debug, Default)]
pub struct TcpConnectionFactory {
    options: TransportOptions,
    pool: BufferPool,
}

impl TcpConnectionFactory {
    pub fn new(options: TransportOptions, pool: BufferPool) -> Self {
        Self { options, pool }
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    fn supports(&self, endpoint: &EndPoint) -> bool {
        matches!(endpoint, EndPoint::Network { .. })
    }

    async fn connect(
        &self,
        endpoint: &EndPoint,
        cancel: &CancellationToken,
    ) -> Result<Connection, TransportError> {
        let EndPoint::Network { host, port } = endpoint else {
            return Err(unsupported_endpoint(error::CONNECT, endpoint));
        };
        debug!(endpoint = %endpoint, "tcp connecting");
        let stream = run_cancellable(
            cancel,
            error::CONNECT,
            None,
            TcpStream::connect((host.as_str(), *port)),
            map_connect_error,
        )
        .await?;
        establish(stream, &self.options, &self.pool)
    }
}

/// 把已建立的套接字包装为已启动的连接。
pub(crate) fn establish(
    stream: TcpStream,
    options: &TransportOptions,
    pool: &BufferPool,
) -> Result<Connection, TransportError> {
    stream
        .set_nodelay(options.socket.nodelay)
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    let local = stream.local_addr().ok().map(EndPoint::from);
    let remote = stream.peer_addr().ok().map(EndPoint::from);
    let connection = Connection::builder(Arc::new(TcpTransport::new(stream)))
        .local(local)
        .remote(remote)
        .options(options)
        .pool(pool.clone())
        .start();
    debug!(
        connection = %connection.id(),
        local = ?connection.local_endpoint(),
        remote = ?connection.remote_endpoint(),
        "tcp connection established"
    );
    Ok(connection)
}
