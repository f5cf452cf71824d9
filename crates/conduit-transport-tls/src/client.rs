use std::sync::Arc;

use conduit_core::{
    BufferPool, ChannelStream, Connection, TransportError, TransportOptions, run_cancellable,
};
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    error::{self, invalid_server_name, map_handshake_error},
    session::{TlsInfo, wrap_session},
};

/// TLS 客户端握手入口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在任意已建立的 [`Connection`] 之上发起握手，产出同样类型的 [`Connection`]；
///   底层是套接字、命名管道还是 WebSocket 对调用方透明。
///
/// ## 逻辑（How）
/// 1. 校验 `server_name`，把内层应用侧通道视作 [`ChannelStream`]；
/// 2. 在取消令牌与 `handshake_timeout` 约束下执行 `tokio_rustls` 握手；
/// 3. 成功后交给 `wrap_session` 产出新连接，失败则释放内层连接并返回分类错误。
///
/// ## 契约（What）
/// - 失败路径总是释放传入的连接，调用方无需再次 `dispose`；
/// - 握手失败为 `ProtocolFailure`，超时为 `ConnectTimeout`，取消为 `Cancelled`。
#[derive(Clone, Debug)]
pub struct TlsClient {
    config: Arc<ClientConfig>,
    options: TransportOptions,
    pool: BufferPool,
}

impl TlsClient {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            options: TransportOptions::default(),
            pool: BufferPool::default(),
        }
    }

    /// 使用给定的握手超时、背压阈值与缓冲池构造外层连接。
    pub fn with_options(mut self, options: TransportOptions, pool: BufferPool) -> Self {
        self.options = options;
        self.pool = pool;
        self
    }

    pub async fn connect(
        &self,
        connection: Connection,
        server_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Connection, TransportError> {
        let name = match ServerName::try_from(server_name.to_owned()) {
            Ok(name) => name,
            Err(_) => {
                connection.dispose().await;
                return Err(invalid_server_name(server_name));
            }
        };
        let stream = ChannelStream::new(connection.transport().clone());
        let handshake = run_cancellable(
            cancel,
            error::HANDSHAKE,
            Some(self.options.tls.handshake_timeout()),
            TlsConnector::from(self.config.clone()).connect(name, stream),
            map_handshake_error,
        )
        .await;

        match handshake {
            Ok(stream) => {
                let info = TlsInfo::from_common(Some(server_name.to_owned()), stream.get_ref().1);
                Ok(wrap_session(stream, connection, info, &self.options, &self.pool))
            }
            Err(err) => {
                warn!(connection = %connection.id(), error = %err, "tls client handshake failed");
                connection.dispose().await;
                Err(err)
            }
        }
    }
}
