use std::sync::Arc;

use arc_swap::ArcSwap;
use conduit_core::{
    BufferPool, ChannelStream, Connection, TransportError, TransportOptions, run_cancellable,
};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    error::{self, map_handshake_error},
    session::{TlsInfo, wrap_session},
};

/// TLS 服务端握手入口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 监听器接受的任意 [`Connection`] 都可以在此升级为 TLS 连接；
/// - 通过 [`ArcSwap`] 热更新 [`ServerConfig`]，满足证书轮换需求。
///
/// ## 契约（What）
/// - `accept`：成功时返回新连接，失败时释放传入的连接并返回分类错误；
/// - `replace_config`：原子替换配置，只影响之后开始的握手，已建立的会话不受影响；
/// - `config_snapshot`：当前配置的 `Arc` 副本；
/// - 克隆体共享同一份可替换配置。
///
/// ## 风险与权衡（Trade-offs）
/// - 替换是无锁操作，调用方需保证新配置中的证书链与私钥匹配，否则后续握手以
///   `ProtocolFailure` 失败。
#[derive(Clone, Debug)]
pub struct TlsServer {
    config: Arc<ArcSwap<ServerConfig>>,
    options: TransportOptions,
    pool: BufferPool,
}

impl TlsServer {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config: Arc::new(ArcSwap::new(config)),
            options: TransportOptions::default(),
            pool: BufferPool::default(),
        }
    }

    pub fn with_options(mut self, options: TransportOptions, pool: BufferPool) -> Self {
        self.options = options;
        self.pool = pool;
        self
    }

    /// 替换当前 TLS 配置，通常用于证书热更新。
    pub fn replace_config(&self, config: Arc<ServerConfig>) {
        self.config.store(config);
    }

    pub fn config_snapshot(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }

    pub async fn accept(
        &self,
        connection: Connection,
        cancel: &CancellationToken,
    ) -> Result<Connection, TransportError> {
        let acceptor = TlsAcceptor::from(self.config.load_full());
        let stream = ChannelStream::new(connection.transport().clone());
        let handshake = run_cancellable(
            cancel,
            error::HANDSHAKE,
            Some(self.options.tls.handshake_timeout()),
            acceptor.accept(stream),
            map_handshake_error,
        )
        .await;

        match handshake {
            Ok(stream) => {
                let session = stream.get_ref().1;
                let info = TlsInfo::from_common(session.server_name().map(str::to_owned), session);
                Ok(wrap_session(stream, connection, info, &self.options, &self.pool))
            }
            Err(err) => {
                warn!(connection = %connection.id(), error = %err, "tls server handshake failed");
                connection.dispose().await;
                Err(err)
            }
        }
    }
}
