#![deny(unsafe_code)]
#![doc = r#"
# conduit-transport-tls

## 设计动机（Why）
- **定位**：中间件范例。TLS 不是一种传输，而是叠加在任意 [`Connection`](conduit_core::Connection)
  之上的字节流变换；握手完成后产出的仍是 `Connection`，因此可以继续叠加其他中间件；
- **复用**：内层连接经 [`ChannelStream`](conduit_core::ChannelStream) 呈现为
  `AsyncRead + AsyncWrite`，外层连接由核心的 [`StreamTransport`](conduit_core::StreamTransport)
  承载，本 crate 只负责握手与错误分类。

## 核心契约（What）
- [`TlsClient::connect`] / [`TlsServer::accept`]：消费内层连接，返回外层连接；
- 外层连接沿用内层标识与端点，能力标注中追加 [`TlsInfo`]；
- 外层释放时先发送 `close_notify`，随后释放内层；内层结束即外层结束；
- [`TlsServer::replace_config`]：证书热更新。

## 风险与考量（Trade-offs）
- 加密提供者由使用方在进程级安装（例如 `aws-lc-rs`），本 crate 不做隐式选择。
"#]

mod client;
mod error;
mod server;
mod session;

pub use client::TlsClient;
pub use server::TlsServer;
pub use session::TlsInfo;
