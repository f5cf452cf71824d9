use std::{fmt, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use conduit_core::{
    Connection, ConnectionFactory, ConnectionListener, EndPoint, ListenerFactory,
};
use tokio_util::sync::CancellationToken;

/// 单个断言内任何等待的上限；超过即视为契约违例而非测试环境抖动。
pub const BOUND: Duration = Duration::from_secs(10);

/// 被测传输：一对工厂加上每次调用都返回新绑定地址的生成器。
///
/// # 契约（What）
/// - `bind` 每次调用都应返回可独立绑定的端点（端口 0、带随机后缀的管道名等），
///   同一测试二进制中的断言会并行执行；
/// - 拨号一律使用监听器报告的真实端点，而不是 `bind` 的原始返回值。
#[derive(Clone)]
pub struct TransportUnderTest {
    listeners: Arc<dyn ListenerFactory>,
    connector: Arc<dyn ConnectionFactory>,
    bind: Arc<dyn Fn() -> EndPoint + Send + Sync>,
}

impl TransportUnderTest {
    pub fn new(
        listeners: Arc<dyn ListenerFactory>,
        connector: Arc<dyn ConnectionFactory>,
        bind: impl Fn() -> EndPoint + Send + Sync + 'static,
    ) -> Self {
        Self {
            listeners,
            connector,
            bind: Arc::new(bind),
        }
    }

    pub async fn bind(&self) -> Result<Box<dyn ConnectionListener>> {
        let endpoint = (self.bind)();
        self.listeners
            .bind(&endpoint)
            .await
            .with_context(|| format!("bind {endpoint}"))
    }

    /// 建立一对互联的连接：`(拨号侧, 接受侧)`。监听器随后解绑，已建立的连接不受影响。
    pub async fn connected_pair(&self) -> Result<(Connection, Connection)> {
        let listener = self.bind().await?;
        let cancel = CancellationToken::new();
        let (client, server) = tokio::time::timeout(BOUND, async {
            tokio::join!(
                self.connector.connect(listener.endpoint(), &cancel),
                listener.accept(&cancel),
            )
        })
        .await
        .context("connect and accept within bound")?;
        listener.unbind().await;

        let client = client.context("connect")?;
        let server = server.context("accept")?.context("listener unbound before accept")?;
        Ok((client, server))
    }
}

impl fmt::Debug for TransportUnderTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportUnderTest").finish_non_exhaustive()
    }
}

/// 从连接的输入方向读取恰好 `len` 字节（可能跨越多个数据块）。
pub async fn read_exact(connection: &Connection, len: usize) -> Result<Vec<u8>> {
    let mut received = Vec::with_capacity(len);
    while received.len() < len {
        let chunk = tokio::time::timeout(BOUND, connection.transport().input().read())
            .await
            .context("read within bound")??
            .with_context(|| format!("stream ended after {} of {len} bytes", received.len()))?;
        received.extend_from_slice(&chunk);
    }
    anyhow::ensure!(
        received.len() == len,
        "read {} bytes, expected exactly {len}",
        received.len()
    );
    Ok(received)
}
