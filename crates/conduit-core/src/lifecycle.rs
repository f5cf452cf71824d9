use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::{OnceCell, watch},
    task::{JoinError, JoinHandle},
};
use tracing::{debug, warn};

use crate::{
    channel::DuplexChannel,
    connection::ConnectionId,
    error::{ErrorKind, TransportError},
    pool::BufferPool,
    pump::{PumpResult, ShutdownReason, receive_pump, send_pump},
    transport::RawTransport,
};

/// 连接生命周期状态。
///
/// - `Created`：适配器已建立，泵尚未启动；
/// - `Active`：两个泵都在运行；
/// - `Draining`：任一泵已结束，另一方向正在收尾；
/// - `Closed`：两个泵都已结束且原生句柄已释放。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Created,
    Active,
    Draining,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Created => "created",
            ConnectionState::Active => "active",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 泵任务与原生句柄的唯一所有者。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 原生句柄只能被一个组件释放，否则“泵还在读、句柄已被回收”的竞态无法避免；
/// - 生命周期把“启动两个泵 → 等待 → 强制另一方向结束 → 释放句柄”收敛为一个监督任务，
///   `dispose` 只需要完成应用侧通道并等待监督任务走到 `Closed`。
///
/// ## 行为（How）
/// - 发送泵先结束：立即 `close()` 原生句柄，阻塞中的原始读随之以 EOF 返回；
/// - 接收泵先结束：不强制关闭，发送方向可以继续工作直到应用完成输出；
/// - 两个泵都结束后调用 `release()`，随后丢弃句柄并发布 `Closed`；
/// - 泵任务 panic 被转换为 `IoFailure`。
///
/// ## 契约（What）
/// - `dispose` 幂等且可并发调用：由 `OnceCell` 串行化，所有调用者都在 `Closed` 之后返回；
/// - 终止错误优先取发送方向，其次接收方向。
pub(crate) struct ConnectionLifecycle {
    id: ConnectionId,
    state: watch::Sender<ConnectionState>,
    raw: Mutex<Option<Arc<dyn RawTransport>>>,
    pending: Mutex<Option<DuplexChannel>>,
    terminal_error: Mutex<Option<TransportError>>,
    disposed: OnceCell<()>,
    pool: BufferPool,
    drain_timeout: Duration,
}

impl ConnectionLifecycle {
    pub(crate) fn new(
        id: ConnectionId,
        raw: Arc<dyn RawTransport>,
        transport: DuplexChannel,
        pool: BufferPool,
        drain_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Created);
        Self {
            id,
            state,
            raw: Mutex::new(Some(raw)),
            pending: Mutex::new(Some(transport)),
            terminal_error: Mutex::new(None),
            disposed: OnceCell::new(),
            pool,
            drain_timeout,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn terminal_error(&self) -> Option<TransportError> {
        self.terminal_error.lock().clone()
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(connection = %self.id, from = %previous, to = %next, "connection state changed");
        }
    }

    fn raw(&self) -> Option<Arc<dyn RawTransport>> {
        self.raw.lock().clone()
    }

    fn close_raw(&self) {
        if let Some(raw) = self.raw() {
            raw.close();
        }
    }

    /// 启动两个泵；重复调用或在 `dispose` 之后调用均为空操作。
    pub(crate) fn start(self: &Arc<Self>) {
        let Some(transport) = self.pending.lock().take() else {
            return;
        };
        let Some(raw) = self.raw() else {
            return;
        };
        let (input, output) = transport.into_parts();
        let reason = ShutdownReason::default();
        let send = tokio::spawn(send_pump(self.id, Arc::clone(&raw), input, Arc::clone(&reason)));
        let receive = tokio::spawn(receive_pump(
            self.id,
            Arc::clone(&raw),
            output,
            self.pool.clone(),
            reason,
        ));
        self.transition(ConnectionState::Active);
        tokio::spawn(Arc::clone(self).supervise(raw, send, receive));
    }

    async fn supervise(
        self: Arc<Self>,
        raw: Arc<dyn RawTransport>,
        mut send: JoinHandle<PumpResult>,
        mut receive: JoinHandle<PumpResult>,
    ) {
        let first = tokio::select! {
            sent = &mut send => Finished::Send(sent),
            received = &mut receive => Finished::Receive(received),
        };
        self.transition(ConnectionState::Draining);
        let (send_result, receive_result) = match first {
            Finished::Send(sent) => {
                raw.close();
                (flatten(sent, "send"), flatten(receive.await, "receive"))
            }
            Finished::Receive(received) => (flatten(send.await, "send"), flatten(received, "receive")),
        };

        let terminal = send_result.or(receive_result);
        if let Some(error) = &terminal {
            warn!(
                connection = %self.id,
                scheme = raw.scheme(),
                kind = %error.kind(),
                error = %error,
                "connection terminated with error"
            );
        }
        *self.terminal_error.lock() = terminal;

        raw.release().await;
        drop(raw);
        self.raw.lock().take();
        self.transition(ConnectionState::Closed);
    }

    /// 优雅释放：完成应用侧通道，等待排空，超时后强制关闭句柄。
    pub(crate) async fn dispose(self: &Arc<Self>, application: &DuplexChannel) {
        self.disposed
            .get_or_init(|| async {
                application.output().complete(None);
                application.input().complete();

                let unstarted = self.pending.lock().take();
                if let Some(transport) = unstarted {
                    Arc::clone(self).release_unstarted(transport).await;
                    return;
                }

                let mut closed = self.subscribe();
                let drained = tokio::time::timeout(self.drain_timeout, wait_closed(&mut closed))
                    .await
                    .is_ok();
                if !drained {
                    debug!(
                        connection = %self.id,
                        timeout_ms = self.drain_timeout.as_millis() as u64,
                        "drain timed out, closing transport"
                    );
                    self.close_raw();
                    wait_closed(&mut closed).await;
                }
            })
            .await;
    }

    /// 立即中止：不等待排空。
    pub(crate) fn abort(self: &Arc<Self>, application: &DuplexChannel) {
        application.output().complete(None);
        let unstarted = self.pending.lock().take();
        match unstarted {
            Some(transport) => {
                tokio::spawn(Arc::clone(self).release_unstarted(transport));
            }
            None => self.close_raw(),
        }
    }

    async fn release_unstarted(self: Arc<Self>, transport: DuplexChannel) {
        transport.output().complete(None);
        transport.input().complete();
        let raw = self.raw.lock().take();
        if let Some(raw) = raw {
            raw.close();
            raw.release().await;
        }
        self.transition(ConnectionState::Closed);
    }
}

enum Finished {
    Send(Result<PumpResult, JoinError>),
    Receive(Result<PumpResult, JoinError>),
}

async fn wait_closed(receiver: &mut watch::Receiver<ConnectionState>) {
    let _ = receiver
        .wait_for(|state| *state == ConnectionState::Closed)
        .await
        .map(|_| ());
}

fn flatten(joined: Result<PumpResult, JoinError>, direction: &'static str) -> PumpResult {
    match joined {
        Ok(result) => result,
        Err(join_error) => Some(
            TransportError::new(
                ErrorKind::IoFailure,
                "conduit.pump.panicked",
                format!("{direction} pump terminated abnormally"),
            )
            .with_cause(join_error),
        ),
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use crate::{
        connection::Connection,
        error::OperationKind,
        transport::{StreamOperations, StreamTransport},
    };

    use super::*;

    const MEMORY: StreamOperations = StreamOperations {
        read: OperationKind::new("conduit.memory.read_failed", "memory read"),
        write: OperationKind::new("conduit.memory.write_failed", "memory write"),
        shutdown: OperationKind::new("conduit.memory.shutdown_failed", "memory shutdown"),
    };

    #[tokio::test]
    #[traced_test]
    async fn lifecycle_transitions_are_logged() {
        let (stream, _peer) = tokio::io::duplex(64);
        let raw: Arc<dyn RawTransport> = Arc::new(StreamTransport::new("memory", stream, MEMORY));
        let connection = Connection::builder(raw).build();
        assert_eq!(connection.state(), ConnectionState::Created);

        connection.start();
        assert_eq!(connection.state(), ConnectionState::Active);
        connection.dispose().await;

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(logs_contain("connection state changed"));
    }
}
