#![deny(unsafe_code)]
#![doc = r#"
# conduit-core

## 设计动机（Why）
- **定位**：把套接字、命名管道、WebSocket 等点对点传输统一为同一种“双工字节流连接”，
  使分帧、加密、多路复用等中间件只需编写一次；
- **核心难点**：不同传输的原生 IO 原语（就绪驱动的套接字、需要重试的命名管道、事件驱动的
  WebSocket）必须呈现完全一致的背压、取消、半关闭与错误传播语义。

## 核心契约（What）
- [`DuplexChannel`]：两条背靠背的有界单向队列，应用侧与传输侧各持一端；
- [`RawTransport`]：每种传输只需提供“一次读 / 一次写 / 关闭 / 释放”；
- 泵循环：每个连接两个独立任务，分别搬运发送与接收方向；
- [`Connection`]：标识 + 端点 + 应用侧通道 + 能力标注 + 生命周期，`dispose` 幂等；
- [`ChannelStream`]：把应用侧通道视作 `AsyncRead + AsyncWrite`，TLS 等中间件据此叠加；
- [`ConnectionFactory`] / [`ListenerFactory`] / [`ConnectorRegistry`]：按端点类型选择传输。

## 实现策略（How）
- 队列以 `parking_lot::Mutex` 保护的状态机实现，等待者通过 waker 唤醒，可同时服务
  `async fn` 与 `poll_*` 两种调用方式；
- 生命周期状态经 `tokio::sync::watch` 发布，释放流程由 `tokio::sync::OnceCell` 串行化；
- 错误在适配器边界归类为 [`ErrorKind`]，之后不再泄露传输特有的错误类型。

## 风险与考量（Trade-offs）
- 泵任务依赖 Tokio 运行时，连接必须在运行时上下文内启动；
- 发送方向结束会强制关闭原生句柄，接收方向结束则不会：消费方读完不需要生产方停止，
  生产方写完则不再需要该连接。
"#]

pub mod channel;
pub mod clock;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod factory;
mod lifecycle;
pub mod options;
pub mod pool;
mod pump;
pub mod stream;
pub mod transport;
pub mod util;

pub use channel::{DuplexChannel, PipeReader, PipeWriter};
pub use clock::{Clock, MockClock, SystemClock};
pub use connection::{Connection, ConnectionBuilder, ConnectionId, InherentKeepAlive, Properties};
pub use endpoint::{EndPoint, ImpersonationLevel, PipeAddress, PipeSecurityOptions, UriAddress};
pub use error::{
    ErrorKind, OperationKind, TransportError, cancelled_error, map_connect_error, map_io_error,
    recover_io_error, timeout_error, unsupported_endpoint,
};
pub use factory::{
    ConnectionFactory, ConnectionListener, ConnectorRegistry, ListenerFactory, ListenerRegistry,
};
pub use lifecycle::ConnectionState;
pub use options::{ConfigError, TransportOptions};
pub use pool::BufferPool;
pub use pump::PumpResult;
pub use stream::ChannelStream;
pub use transport::{RawTransport, StreamOperations, StreamTransport};
pub use util::run_cancellable;
