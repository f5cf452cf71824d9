use std::{io, net::Shutdown};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use conduit_core::{ErrorKind, RawTransport, TransportError, map_io_error};
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error;

/// 流式套接字的原始传输句柄。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 读泵与写泵需要在同一个套接字上并发工作；Tokio 的 `TcpStream` 提供 `&self` 上的就绪等待与
///   `try_read`/`try_write`，无需拆分或加锁；
/// - `close` 必须能打断阻塞中的读取，因此同时触发内部令牌并对套接字执行 `shutdown(Both)`。
///
/// ## 逻辑（How）
/// - `read`：等待可读就绪（与关闭令牌竞争），随后 `try_read_buf`，遇到 `WouldBlock` 重新等待；
/// - `write`：循环等待可写就绪并 `try_write`，直到整块写完；
/// - `release`：若尚未中止，先以 `shutdown(Write)` 发送 FIN，句柄随传输对象一起释放。
///
/// ## 契约（What）
/// - 连接被重置/中止、管道断开均归类为 `TransportAborted`，对泵而言等价于优雅结束；
/// - 本地关闭后的写入返回 `TransportAborted`，读取返回 EOF。
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    closed: CancellationToken,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            closed: CancellationToken::new(),
        }
    }

    fn aborted() -> TransportError {
        TransportError::new(
            ErrorKind::TransportAborted,
            error::WRITE.code,
            "tcp write: socket closed locally",
        )
    }

    fn shutdown(&self, how: Shutdown) {
        if let Err(err) = SockRef::from(&self.stream).shutdown(how) {
            if err.kind() != io::ErrorKind::NotConnected {
                tracing::debug!(error = %err, ?how, "tcp shutdown failed");
            }
        }
    }
}

#[async_trait]
impl RawTransport for TcpTransport {
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    async fn read(&self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        loop {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Ok(0),
                ready = self.stream.readable() => ready.map_err(|err| map_io_error(error::READ, err))?,
            }
            match self.stream.try_read_buf(buf) {
                Ok(read) => return Ok(read),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(map_io_error(error::READ, err)),
            }
        }
    }

    async fn write(&self, data: Bytes) -> Result<(), TransportError> {
        let mut offset = 0;
        while offset < data.len() {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(Self::aborted()),
                ready = self.stream.writable() => ready.map_err(|err| map_io_error(error::WRITE, err))?,
            }
            match self.stream.try_write(&data[offset..]) {
                Ok(written) => offset += written,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(map_io_error(error::WRITE, err)),
            }
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.shutdown(Shutdown::Both);
    }

    async fn release(&self) {
        if !self.closed.is_cancelled() {
            self.shutdown(Shutdown::Write);
            self.closed.cancel();
        }
    }
}
