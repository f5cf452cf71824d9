#![deny(unsafe_code)]
#![doc = r#"
# conduit-transport-tcp

## 设计动机（Why）
- **定位**：conduit 的流式套接字变体，把 Tokio `TcpStream` 适配为
  [`RawTransport`](conduit_core::RawTransport)，其余的泵循环、背压与生命周期全部复用核心实现；
- **错误分类**：连接重置/中止视为优雅结束，其余 IO 错误为致命的 `IoFailure`。

## 核心契约（What）
- [`TcpConnectionFactory`]：`EndPoint::Network` → 已启动的 [`Connection`](conduit_core::Connection)；
- [`TcpListenerFactory`] / [`TcpConnectionListener`]：绑定、接受与解绑；
- [`TcpTransport`]：就绪驱动的原始读写，`close` 通过 `socket2` 执行 `shutdown(Both)`
  以打断阻塞中的读取。

## 风险与考量（Trade-offs）
- 建连不设内置超时，调用方通过取消令牌控制等待时长。
"#]

mod connector;
mod error;
mod listener;
mod transport;

pub use connector::TcpConnectionFactory;
pub use listener::{TcpConnectionListener, TcpListenerFactory};
pub use transport::TcpTransport;
