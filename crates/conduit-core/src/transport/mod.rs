//! 原生传输句柄的最小契约。

mod stream;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::error::TransportError;

pub use stream::{StreamOperations, StreamTransport};

/// 传输适配器：独占一个原生 IO 句柄，只提供“一次读 / 一次写 / 关闭”三个原语。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 套接字、命名管道、WebSocket 的原生 IO 行为差异巨大，把差异压缩到这三个原语后，
///   泵循环与生命周期只需实现一次；
/// - 错误在此边界完成分类，之后不再出现传输特有的错误类型。
///
/// ## 契约（What）
/// - `read`：向 `buf` 的空闲容量追加数据，返回读取字节数，`0` 表示 EOF；
/// - `write`：完整写出 `data`；
/// - `close`：幂等的中止操作，必须让进行中的 `read` 以 EOF（或可优雅处理的错误）返回；
/// - `release`：由生命周期在两个泵都结束后恰好调用一次，执行优雅关闭并释放资源。
///
/// ## 并发（Concurrency）
/// - 同一时刻最多有一个 `read` 与一个 `write` 在进行，它们来自不同的泵任务；
/// - `close` 可能与二者并发调用。
#[async_trait]
pub trait RawTransport: Send + Sync + 'static {
    /// 日志用的短标签，例如 `tcp`、`pipe`、`ws`、`tls`。
    fn scheme(&self) -> &'static str;

    async fn read(&self, buf: &mut BytesMut) -> Result<usize, TransportError>;

    async fn write(&self, data: Bytes) -> Result<(), TransportError>;

    fn close(&self);

    async fn release(&self);
}
