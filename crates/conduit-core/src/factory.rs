use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    connection::Connection,
    endpoint::EndPoint,
    error::{OperationKind, TransportError, unsupported_endpoint},
};

const RESOLVE_CONNECTOR: OperationKind =
    OperationKind::new("conduit.registry.resolve_connector", "resolve connector");
const RESOLVE_LISTENER: OperationKind =
    OperationKind::new("conduit.registry.resolve_listener", "resolve listener");

/// 主动建连工厂。
///
/// # 契约（What）
/// - `supports` 只做类型判断，不触发任何 IO；
/// - `connect` 成功时返回已启动的连接；失败时返回
///   `UnsupportedEndpoint | ConnectTimeout | ConnectRefused | Cancelled`，未归类的 OS 错误为 `IoFailure`；
/// - 取消令牌只作用于建连过程，不影响已建立的连接。
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    fn supports(&self, endpoint: &EndPoint) -> bool;

    async fn connect(
        &self,
        endpoint: &EndPoint,
        cancel: &CancellationToken,
    ) -> Result<Connection, TransportError>;
}

/// 监听工厂。
#[async_trait]
pub trait ListenerFactory: Send + Sync + 'static {
    fn can_bind(&self, endpoint: &EndPoint) -> bool;

    async fn bind(&self, endpoint: &EndPoint) -> Result<Box<dyn ConnectionListener>, TransportError>;
}

/// 已绑定的监听器。
///
/// # 契约（What）
/// - `endpoint` 返回实际绑定的端点（例如端口 0 绑定后的真实端口）；
/// - `accept` 在 `unbind` 之后返回 `Ok(None)`；取消令牌触发时返回 `Cancelled`；
/// - `unbind` 幂等，并唤醒挂起中的 `accept`。
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    fn endpoint(&self) -> &EndPoint;

    async fn accept(&self, cancel: &CancellationToken) -> Result<Option<Connection>, TransportError>;

    async fn unbind(&self);
}

/// 按注册顺序解析端点的建连工厂集合。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 应用只持有一个入口，按端点类型自动选择套接字、命名管道或 WebSocket 工厂；
/// - 注册顺序即优先级，允许用更具体的工厂覆盖通用工厂。
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: Vec<Arc<dyn ConnectionFactory>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ConnectionFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    pub fn with(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// 第一个声明支持该端点的工厂。
    pub fn resolve(&self, endpoint: &EndPoint) -> Option<&Arc<dyn ConnectionFactory>> {
        self.factories.iter().find(|factory| factory.supports(endpoint))
    }

    pub async fn connect(
        &self,
        endpoint: &EndPoint,
        cancel: &CancellationToken,
    ) -> Result<Connection, TransportError> {
        let factory = self
            .resolve(endpoint)
            .ok_or_else(|| unsupported_endpoint(RESOLVE_CONNECTOR, endpoint))?;
        debug!(endpoint = %endpoint, kind = endpoint.kind(), "dispatching connect");
        factory.connect(endpoint, cancel).await
    }
}

/// 按注册顺序解析端点的监听工厂集合。
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    factories: Vec<Arc<dyn ListenerFactory>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ListenerFactory>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    pub fn with(mut self, factory: Arc<dyn ListenerFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    pub async fn bind(&self, endpoint: &EndPoint) -> Result<Box<dyn ConnectionListener>, TransportError> {
        let factory = self
            .factories
            .iter()
            .find(|factory| factory.can_bind(endpoint))
            .ok_or_else(|| unsupported_endpoint(RESOLVE_LISTENER, endpoint))?;
        debug!(endpoint = %endpoint, kind = endpoint.kind(), "dispatching bind");
        factory.bind(endpoint).await
    }
}
