use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    channel::DuplexChannel,
    endpoint::EndPoint,
    error::TransportError,
    lifecycle::{ConnectionLifecycle, ConnectionState},
    options::{ChannelOptions, TransportOptions},
    pool::BufferPool,
    transport::RawTransport,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的连接标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// 连接“自带保活”能力标记。
///
/// 上游超时逻辑可据此跳过应用层心跳；本库只负责标注，不实现保活行为。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InherentKeepAlive(pub bool);

/// 按类型索引的能力标注集合。
///
/// # 契约（What）
/// - 每个类型至多一个值，重复插入覆盖旧值；
/// - 克隆为浅拷贝，值本身以 `Arc` 共享。
#[derive(Clone, Default)]
pub struct Properties {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Properties")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// 一个已建立的双工连接。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 取代“基类 + 大量可覆写属性”的继承式连接上下文：连接只由
///   {标识、端点信息、应用侧通道、能力标注、生命周期} 组成；
/// - 所有传输变体产出同一种 `Connection`，TLS 等中间件也产出同一种 `Connection`，
///   因此中间件可以任意叠加。
///
/// ## 契约（What）
/// - [`Connection::transport`] 返回应用侧通道：从 `input` 读取对端数据，向 `output` 写入要发送的数据；
/// - [`Connection::dispose`] 幂等、可并发调用，返回时状态为 `Closed`；
/// - 连接被 Drop 时应用侧句柄随之释放，输出方向以 EOF 结束，泵随后自行收尾。
///
/// ## 注意（Trade-offs）
/// - `Connection` 不可克隆；需要共享时由调用方包一层 `Arc`。
pub struct Connection {
    id: ConnectionId,
    local: Option<EndPoint>,
    remote: Option<EndPoint>,
    transport: DuplexChannel,
    properties: Properties,
    lifecycle: Arc<ConnectionLifecycle>,
}

impl Connection {
    /// 以原生传输句柄开始构建连接。
    pub fn builder(raw: Arc<dyn RawTransport>) -> ConnectionBuilder {
        ConnectionBuilder::new(raw)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_endpoint(&self) -> Option<&EndPoint> {
        self.local.as_ref()
    }

    pub fn remote_endpoint(&self) -> Option<&EndPoint> {
        self.remote.as_ref()
    }

    /// 应用侧双工通道。
    pub fn transport(&self) -> &DuplexChannel {
        &self.transport
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// 是否声明了自带保活能力。
    pub fn has_inherent_keep_alive(&self) -> bool {
        self.properties
            .get::<InherentKeepAlive>()
            .is_some_and(|flag| flag.0)
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// 等待连接进入 `Closed`。
    pub async fn closed(&self) {
        let mut receiver = self.lifecycle.subscribe();
        let _ = receiver
            .wait_for(|state| *state == ConnectionState::Closed)
            .await
            .map(|_| ());
    }

    /// 终止错误；干净结束或尚未结束时为 `None`。
    pub fn terminal_error(&self) -> Option<TransportError> {
        self.lifecycle.terminal_error()
    }

    /// 启动泵循环；已启动时为空操作。
    pub fn start(&self) {
        self.lifecycle.start();
    }

    /// 优雅释放连接。
    pub async fn dispose(&self) {
        self.lifecycle.dispose(&self.transport).await;
    }

    /// 立即中止连接，不等待发送方向排空。
    pub fn abort(&self) {
        self.lifecycle.abort(&self.transport);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .field("properties", &self.properties)
            .finish()
    }
}

/// [`Connection`] 的构建器。
///
/// # 契约（What）
/// - `build` 产出 `Created` 状态的连接，需要调用 [`Connection::start`] 才开始收发；
/// - `start` 是 `build` + `Connection::start` 的便捷组合，必须在 Tokio 运行时内调用。
pub struct ConnectionBuilder {
    raw: Arc<dyn RawTransport>,
    id: Option<ConnectionId>,
    local: Option<EndPoint>,
    remote: Option<EndPoint>,
    properties: Properties,
    input: ChannelOptions,
    output: ChannelOptions,
    drain_timeout: Duration,
    pool: Option<BufferPool>,
}

impl ConnectionBuilder {
    pub fn new(raw: Arc<dyn RawTransport>) -> Self {
        let defaults = TransportOptions::default();
        Self {
            raw,
            id: None,
            local: None,
            remote: None,
            properties: Properties::new(),
            input: defaults.channel,
            output: defaults.channel,
            drain_timeout: defaults.lifecycle.drain_timeout(),
            pool: None,
        }
    }

    /// 沿用已有的连接标识，中间件重新包装连接时使用。
    pub fn id(mut self, id: ConnectionId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn local(mut self, endpoint: Option<EndPoint>) -> Self {
        self.local = endpoint;
        self
    }

    pub fn remote(mut self, endpoint: Option<EndPoint>) -> Self {
        self.remote = endpoint;
        self
    }

    pub fn property<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.properties.insert(value);
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// 两个方向使用同一组背压阈值。
    pub fn channel_options(mut self, options: ChannelOptions) -> Self {
        self.input = options;
        self.output = options;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn pool(mut self, pool: BufferPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// 应用背压阈值与排空超时配置。
    pub fn options(self, options: &TransportOptions) -> Self {
        self.channel_options(options.channel)
            .drain_timeout(options.lifecycle.drain_timeout())
    }

    pub fn build(self) -> Connection {
        let id = self.id.unwrap_or_else(ConnectionId::next);
        let (application, transport) = DuplexChannel::pair(self.input, self.output);
        let pool = self.pool.unwrap_or_default();
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            id,
            self.raw,
            transport,
            pool,
            self.drain_timeout,
        ));
        Connection {
            id,
            local: self.local,
            remote: self.remote,
            transport: application,
            properties: self.properties,
            lifecycle,
        }
    }

    pub fn start(self) -> Connection {
        let connection = self.build();
        connection.start();
        connection
    }
}
