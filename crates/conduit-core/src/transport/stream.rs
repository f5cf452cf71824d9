use std::{io, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::{
    connection::Connection,
    error::{ErrorKind, OperationKind, TransportError, map_io_error},
};

use super::RawTransport;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// 一个字节流传输的三类操作对应的错误码。
#[derive(Clone, Copy, Debug)]
pub struct StreamOperations {
    pub read: OperationKind,
    pub write: OperationKind,
    pub shutdown: OperationKind,
}

/// 基于任意 `AsyncRead + AsyncWrite` 的通用传输适配器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 命名管道与 TLS 会话在建立之后都表现为普通字节流，不需要各自实现泵所需的原语；
/// - 读写两半拆开并各自加锁，读泵与写泵可以真正并行。
///
/// ## 行为（How）
/// - `close` 触发内部令牌：挂起中的 `read` 立即返回 EOF，挂起中的 `write` 返回 `TransportAborted`；
/// - `release` 在宽限期内尝试优雅关闭写半部（TLS 借此发送 `close_notify`），再释放挂接的内层连接；
/// - 错误经由构造时传入的映射函数分类。
///
/// ## 注意（Trade-offs）
/// - 宽限期固定为一秒，内层已失效时不会让生命周期长时间停在 `Draining`。
pub struct StreamTransport<S> {
    scheme: &'static str,
    reader: AsyncMutex<ReadHalf<S>>,
    writer: AsyncMutex<WriteHalf<S>>,
    closed: CancellationToken,
    operations: StreamOperations,
    map_error: fn(OperationKind, io::Error) -> TransportError,
    inner: Mutex<Option<Connection>>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(scheme: &'static str, stream: S, operations: StreamOperations) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            scheme,
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            closed: CancellationToken::new(),
            operations,
            map_error: map_io_error,
            inner: Mutex::new(None),
        }
    }

    /// 替换默认的 IO 错误分类函数。
    pub fn with_error_mapper(mut self, map_error: fn(OperationKind, io::Error) -> TransportError) -> Self {
        self.map_error = map_error;
        self
    }

    /// 挂接一个内层连接，`release` 时随之释放。
    pub fn with_inner(self, connection: Connection) -> Self {
        *self.inner.lock() = Some(connection);
        self
    }

    fn aborted(&self) -> TransportError {
        TransportError::new(
            ErrorKind::TransportAborted,
            self.operations.write.code,
            format!("{}: transport closed locally", self.operations.write.message),
        )
    }
}

#[async_trait]
impl<S> RawTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn scheme(&self) -> &'static str {
        self.scheme
    }

    async fn read(&self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        if self.closed.is_cancelled() {
            return Ok(0);
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(0),
            result = reader.read_buf(buf) => result.map_err(|err| (self.map_error)(self.operations.read, err)),
        }
    }

    async fn write(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(self.aborted());
        }
        let mut writer = self.writer.lock().await;
        let io = async {
            writer.write_all(&data).await?;
            writer.flush().await
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(self.aborted()),
            result = io => result.map_err(|err| (self.map_error)(self.operations.write, err)),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    async fn release(&self) {
        {
            let mut writer = self.writer.lock().await;
            if let Err(err) = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await.unwrap_or(Ok(())) {
                let error = (self.map_error)(self.operations.shutdown, err);
                tracing::debug!(scheme = self.scheme, error = %error, "stream shutdown failed");
            }
        }
        self.closed.cancel();
        let inner = self.inner.lock().take();
        if let Some(inner) = inner {
            inner.dispose().await;
        }
    }
}
