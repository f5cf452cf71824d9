use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::{
    channel::{PipeReader, PipeWriter},
    connection::ConnectionId,
    error::TransportError,
    pool::BufferPool,
    transport::RawTransport,
};

/// 单个泵循环的结论：`None` 表示干净结束。
pub type PumpResult = Option<TransportError>;

/// 发送泵记录的致命原因，供接收泵在因中止而结束时交给应用。
pub(crate) type ShutdownReason = Arc<Mutex<Option<TransportError>>>;

/// 发送泵：应用输出 → 原始写。
///
/// # 契约（What）
/// - 应用完成输出（EOF）时干净结束；
/// - 原始写失败时记录原因，并以该原因完成应用输出的读端，使应用后续写入观察到失败；
/// - 无论如何结束，应用输出的读端都会被完成，挂起中的应用写入随之返回。
pub(crate) async fn send_pump(
    id: ConnectionId,
    raw: Arc<dyn RawTransport>,
    input: PipeReader,
    shutdown_reason: ShutdownReason,
) -> PumpResult {
    let result = loop {
        match input.read().await {
            Ok(Some(chunk)) => {
                trace!(connection = %id, len = chunk.len(), "send pump forwarding chunk");
                if let Err(error) = raw.write(chunk).await {
                    if error.is_graceful() {
                        input.complete_with(error);
                        break None;
                    }
                    warn!(connection = %id, scheme = raw.scheme(), error = %error, "raw write failed");
                    *shutdown_reason.lock() = Some(error.clone());
                    input.complete_with(error.clone());
                    break Some(error);
                }
            }
            Ok(None) => break None,
            Err(error) if error.is_graceful() => break None,
            Err(error) => break Some(error),
        }
    };
    input.complete();
    result
}

/// 接收泵：原始读 → 应用输入。
///
/// # 契约（What）
/// - 原始读返回 EOF 或可优雅处理的错误时干净结束；
/// - 应用已停止读取（写入应用输入失败）时干净结束；
/// - 致命错误以错误方式完成应用输入；干净结束时若发送泵记录过原因，应用观察到的是该原因。
pub(crate) async fn receive_pump(
    id: ConnectionId,
    raw: Arc<dyn RawTransport>,
    output: PipeWriter,
    pool: BufferPool,
    shutdown_reason: ShutdownReason,
) -> PumpResult {
    let result = loop {
        let mut buffer = pool.acquire();
        match raw.read(&mut buffer).await {
            Ok(0) => {
                pool.release(buffer);
                break None;
            }
            Ok(len) => {
                let chunk = buffer.split().freeze();
                pool.release(buffer);
                trace!(connection = %id, len, "receive pump forwarding chunk");
                if output.write(chunk).await.is_err() {
                    break None;
                }
            }
            Err(error) if error.is_graceful() => break None,
            Err(error) => {
                warn!(connection = %id, scheme = raw.scheme(), error = %error, "raw read failed");
                break Some(error);
            }
        }
    };
    let reason = result.clone().or_else(|| shutdown_reason.lock().clone());
    output.complete(reason);
    result
}
