#![deny(unsafe_code)]
#![doc = r#"
# conduit-transport-websocket

## 设计动机（Why）
- **定位**：WebSocket 是事件驱动的消息协议，而 conduit 的泵循环按字节流拉取；
  本 crate 把“消息到达”桥接为“读一次”，让 WebSocket 连接与套接字、命名管道呈现同一契约；
- **背压**：接收泵只有在上一条消息被应用侧通道接受后才拉取下一条，慢消费者会反压到 TCP 窗口。

## 核心契约（What）
- [`WebSocketConnectionFactory`]：`ws://` 端点 → 已启动的连接，携带 `InherentKeepAlive(true)`；
- [`WebSocketListenerFactory`] / [`WebSocketConnectionListener`]：绑定、按路径接受升级、解绑；
- [`WebSocketTransport`]：文本与二进制消息均以原始字节转发，关闭帧即 EOF，
  超过 `max_message_size` 的消息为 `ProtocolFailure`。

## 风险与考量（Trade-offs）
- 未启用 `wss`：加密应通过 TLS 中间件在明文连接上叠加，或由反向代理终结。
"#]

mod connector;
mod error;
mod listener;
mod transport;

pub use connector::WebSocketConnectionFactory;
pub use listener::{WebSocketConnectionListener, WebSocketListenerFactory};
pub use transport::WebSocketTransport;
