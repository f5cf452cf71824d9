use std::{future::Future, io, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::error::{OperationKind, TransportError, cancelled_error, timeout_error};

/// 在取消令牌与可选超时的约束下执行一次 IO Future。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 建连、握手与接受连接都需要同一套“取消优先、超时其次、否则映射 IO 错误”的治理逻辑，
///   集中在此处可避免每个传输各写一遍 `tokio::select!`；
/// - 令牌的取消是事件驱动的，不需要定时轮询。
///
/// ## 契约（What）
/// - 令牌已取消时立即返回 `Cancelled`，不会轮询 `future`；
/// - `timeout` 到期返回 `ConnectTimeout`；
/// - `future` 失败时交给 `map_error` 分类。
pub async fn run_cancellable<F, T, Map>(
    cancel: &CancellationToken,
    kind: OperationKind,
    timeout: Option<Duration>,
    future: F,
    map_error: Map,
) -> Result<T, TransportError>
where
    F: Future<Output = io::Result<T>>,
    Map: Fn(OperationKind, io::Error) -> TransportError,
{
    if cancel.is_cancelled() {
        return Err(cancelled_error(kind));
    }
    tokio::pin!(future);
    match timeout {
        Some(timeout) => {
            let sleep = tokio::time::sleep(timeout);
            tokio::pin!(sleep);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(cancelled_error(kind)),
                _ = &mut sleep => Err(timeout_error(kind)),
                result = &mut future => result.map_err(|err| map_error(kind, err)),
            }
        }
        None => tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled_error(kind)),
            result = &mut future => result.map_err(|err| map_error(kind, err)),
        },
    }
}
