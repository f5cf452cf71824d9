use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::channel::DuplexChannel;

/// 把应用侧 [`DuplexChannel`] 视作 `AsyncRead + AsyncWrite` 字节流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - TLS 等中间件只认识字节流接口；通过该视图，它们可以运行在任意传输的通道之上，
///   而无需知道底层是套接字、命名管道还是 WebSocket；
/// - 通道的背压与完成语义原样穿透：写入在队列暂停时返回 `Pending`，读到 EOF 即返回 0 字节。
///
/// ## 契约（What）
/// - `poll_read`：通道携带错误完成时，错误被包装为 `io::Error` 交付一次，可用
///   [`crate::recover_io_error`] 还原；
/// - `poll_write`：每次调用整体入队，返回写入长度；
/// - `poll_flush`：等待背压解除；
/// - `poll_shutdown`：以无错误方式完成输出方向。
///
/// ## 注意（Trade-offs）
/// - 当前数据块未被读完时剩余部分暂存在视图内；视图被 Drop 时这部分数据随之丢弃。
#[derive(Debug)]
pub struct ChannelStream {
    channel: DuplexChannel,
    leftover: Bytes,
}

impl ChannelStream {
    pub fn new(channel: DuplexChannel) -> Self {
        Self {
            channel,
            leftover: Bytes::new(),
        }
    }

    pub fn channel(&self) -> &DuplexChannel {
        &self.channel
    }
}

impl AsyncRead for ChannelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.leftover.is_empty() {
            match ready!(this.channel.input().poll_read(cx)) {
                Ok(Some(chunk)) => this.leftover = chunk,
                Ok(None) => return Poll::Ready(Ok(())),
                Err(error) => return Poll::Ready(Err(error.into())),
            }
        }
        let len = buf.remaining().min(this.leftover.len());
        buf.put_slice(&this.leftover[..len]);
        this.leftover.advance(len);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ChannelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let output = self.channel.output();
        ready!(output.poll_ready(cx))?;
        output.push(Bytes::copy_from_slice(buf))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.channel.output().poll_flush(cx).map_err(io::Error::from)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.channel.output().complete(None);
        Poll::Ready(Ok(()))
    }
}
