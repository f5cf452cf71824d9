use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use conduit_core::{ErrorKind, RawTransport, TransportError};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex as AsyncMutex,
};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{self, map_ws_error, message_too_large};

/// 发送关闭帧的宽限期。
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// 把事件驱动的 WebSocket 消息流桥接为拉取式的原生读写。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - WebSocket 以“消息到达”事件推送数据，而泵循环以“读一次”拉取数据；
///   桥接的关键是背压：下一条消息只有在上一条被应用侧通道确认（接收泵的 `write` 返回）
///   之后才会被拉取，慢消费者因此会一路反压到 TCP 窗口；
/// - 读写两半分别加锁，发送泵与接收泵互不阻塞。
///
/// ## 契约（What）
/// - `read`：文本与二进制消息都按原始字节复制进缓冲；关闭帧或流结束返回 0；
///   ping/pong 由协议库处理，不出现在字节流中；超过 `max_message_size` 的消息为 `ProtocolFailure`；
/// - `write`：每个数据块作为一条二进制消息发送并刷新；
/// - `close`：打断挂起中的读写；`release`：在宽限期内发送关闭帧。
///
/// ## 注意（Trade-offs）
/// - 空消息被跳过，读到 0 字节始终表示流结束。
pub struct WebSocketTransport<S> {
    sink: AsyncMutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: AsyncMutex<SplitStream<WebSocketStream<S>>>,
    closed: CancellationToken,
    max_message_size: usize,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(socket: WebSocketStream<S>, max_message_size: usize) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: AsyncMutex::new(sink),
            stream: AsyncMutex::new(stream),
            closed: CancellationToken::new(),
            max_message_size,
        }
    }

    fn accept_payload(&self, payload: &[u8], buf: &mut BytesMut) -> Result<usize, TransportError> {
        if payload.len() > self.max_message_size {
            return Err(message_too_large(payload.len(), self.max_message_size));
        }
        buf.extend_from_slice(payload);
        Ok(payload.len())
    }
}

#[async_trait]
impl<S> RawTransport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn scheme(&self) -> &'static str {
        "ws"
    }

    async fn read(&self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Ok(0),
                next = stream.next() => next,
            };
            let message = match next {
                None => return Ok(0),
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(map_ws_error(error::READ, err)),
            };
            match message {
                Message::Binary(data) if !data.is_empty() => return self.accept_payload(&data, buf),
                Message::Text(text) if !text.is_empty() => {
                    return self.accept_payload(text.as_bytes(), buf);
                }
                Message::Close(frame) => {
                    trace!(?frame, "websocket close frame received");
                    return Ok(0);
                }
                _ => continue,
            }
        }
    }

    async fn write(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(aborted());
        }
        let mut sink = self.sink.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(aborted()),
            result = sink.send(Message::Binary(data)) => {
                result.map_err(|err| map_ws_error(error::WRITE, err))
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    async fn release(&self) {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(CLOSE_GRACE, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "websocket close frame not delivered"),
            Err(_) => debug!("websocket close frame timed out"),
        }
        self.closed.cancel();
    }
}

fn aborted() -> TransportError {
    TransportError::new(
        ErrorKind::TransportAborted,
        error::WRITE.code,
        "websocket write: transport closed locally",
    )
}
