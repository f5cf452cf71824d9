//! 命名管道建连状态机。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 命名管道服务端在两次 `accept` 之间没有可用实例，客户端看到的是“管道忙”或“不存在”，
//!   而不是排队等待；要想可靠地建连，只能按固定量子重试；
//! - 重试逻辑与平台打开原语分离：[`PipeOpener`] 负责“尝试一次”，[`PipeConnector`]
//!   负责计时、取消与状态迁移，测试可以同时替换两者。
//!
//! ## 状态（What）
//! ```text
//! Idle ─► Connecting ─┬─► Connected
//!                     ├─► TimedOut   （累计耗时达到 connect_timeout）
//!                     ├─► Failed     （非“未就绪”类错误）
//!                     └─► Cancelled  （令牌取消，检查点在每次尝试之前与每次等待期间）
//! ```
//!
//! ## 契约（How）
//! - 每次等待 `min(poll_quantum, 剩余时间)`，因此超时最迟在 `connect_timeout + 一次尝试耗时`
//!   内被观察到；
//! - 取消在等待期间由令牌事件直接唤醒，不依赖下一次量子到期；
//! - 时间全部取自注入的 [`Clock`]，`MockClock` 下整个流程可确定性推进。

use std::{fmt, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use conduit_core::{
    Clock, PipeAddress, SystemClock, TransportError, cancelled_error, map_connect_error,
    timeout_error,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::CONNECT;

/// 一次打开尝试的结果。
pub enum Attempt<S> {
    /// 已连上对端实例。
    Ready(S),
    /// 服务端暂无空闲实例或尚未创建管道，稍后重试。
    NotReady,
    /// 不可恢复的失败。
    Failed(io::Error),
}

impl<S> fmt::Debug for Attempt<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Ready(_) => f.write_str("Ready"),
            Attempt::NotReady => f.write_str("NotReady"),
            Attempt::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// 平台相关的“尝试打开一次管道”原语。
#[async_trait]
pub trait PipeOpener: Send + Sync + 'static {
    type Stream: Send + 'static;

    async fn try_open(&self, address: &PipeAddress) -> Attempt<Self::Stream>;
}

/// 建连状态机的可观察状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    Connecting,
    Connected,
    TimedOut,
    Failed,
    Cancelled,
}

impl ConnectState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ConnectState::Idle | ConnectState::Connecting)
    }
}

/// 有界重试的管道拨号器。
pub struct PipeConnector<O> {
    opener: O,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
    quantum: Duration,
}

impl<O: PipeOpener> PipeConnector<O> {
    /// `timeout` 为 `None` 时一直重试直到取消。
    pub fn new(opener: O, timeout: Option<Duration>, quantum: Duration) -> Self {
        Self {
            opener,
            clock: Arc::new(SystemClock),
            timeout,
            quantum,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 执行一次完整的建连流程。
    ///
    /// # 错误
    /// - `Cancelled`：令牌在尝试前或等待中被取消；
    /// - `ConnectTimeout`：累计耗时达到上限；
    /// - 其余：由 [`map_connect_error`] 分类的打开失败。
    pub async fn connect(
        &self,
        address: &PipeAddress,
        cancel: &CancellationToken,
    ) -> Result<O::Stream, TransportError> {
        let mut run = Run {
            address,
            state: ConnectState::Idle,
            attempts: 0,
        };
        let started = self.clock.now();
        run.transition(ConnectState::Connecting);

        loop {
            if cancel.is_cancelled() {
                run.transition(ConnectState::Cancelled);
                return Err(cancelled_error(CONNECT));
            }

            run.attempts += 1;
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    run.transition(ConnectState::Cancelled);
                    return Err(cancelled_error(CONNECT));
                }
                attempt = self.opener.try_open(address) => attempt,
            };
            match attempt {
                Attempt::Ready(stream) => {
                    run.transition(ConnectState::Connected);
                    return Ok(stream);
                }
                Attempt::Failed(err) => {
                    run.transition(ConnectState::Failed);
                    return Err(map_connect_error(CONNECT, err));
                }
                Attempt::NotReady => {}
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            let wait = match self.timeout {
                Some(timeout) if elapsed >= timeout => {
                    run.transition(ConnectState::TimedOut);
                    return Err(timeout_error(CONNECT));
                }
                Some(timeout) => self.quantum.min(timeout - elapsed),
                None => self.quantum,
            };
            trace!(pipe = %address, attempt = run.attempts, ?wait, "pipe not ready, waiting");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    run.transition(ConnectState::Cancelled);
                    return Err(cancelled_error(CONNECT));
                }
                _ = self.clock.sleep(wait) => {}
            }
        }
    }
}

impl<O> fmt::Debug for PipeConnector<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeConnector")
            .field("timeout", &self.timeout)
            .field("quantum", &self.quantum)
            .finish_non_exhaustive()
    }
}

struct Run<'a> {
    address: &'a PipeAddress,
    state: ConnectState,
    attempts: u32,
}

impl Run<'_> {
    fn transition(&mut self, next: ConnectState) {
        debug_assert!(!self.state.is_terminal(), "transition out of terminal state");
        let previous = self.state;
        self.state = next;
        if next.is_terminal() {
            debug!(
                pipe = %self.address,
                from = ?previous,
                to = ?next,
                attempts = self.attempts,
                "pipe connect finished"
            );
        } else {
            trace!(pipe = %self.address, from = ?previous, to = ?next, "pipe connect state");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use conduit_core::{ErrorKind, MockClock};

    use super::*;

    /// 前 `ready_after` 次返回未就绪，之后返回成功；`ready_after == u32::MAX` 时永不就绪。
    struct ScriptedOpener {
        ready_after: u32,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PipeOpener for ScriptedOpener {
        type Stream = u32;

        async fn try_open(&self, _: &PipeAddress) -> Attempt<u32> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.ready_after {
                Attempt::Ready(n)
            } else {
                Attempt::NotReady
            }
        }
    }

    struct DeniedOpener;

    /// 单次打开永不返回，模拟卡在系统调用中的尝试。
    struct StuckOpener;

    #[async_trait]
    impl PipeOpener for StuckOpener {
        type Stream = ();

        async fn try_open(&self, _: &PipeAddress) -> Attempt<()> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl PipeOpener for DeniedOpener {
        type Stream = ();

        async fn try_open(&self, _: &PipeAddress) -> Attempt<()> {
            Attempt::Failed(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    fn opener(ready_after: u32) -> (ScriptedOpener, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        (
            ScriptedOpener {
                ready_after,
                attempts: attempts.clone(),
            },
            attempts,
        )
    }

    /// 以 10ms 步长推进虚拟时钟，直到任务结束。
    async fn drive<T>(clock: &MockClock, handle: tokio::task::JoinHandle<T>) -> T {
        while !handle.is_finished() {
            if clock.pending_sleepers() > 0 {
                clock.advance(Duration::from_millis(10));
            }
            tokio::task::yield_now().await;
        }
        handle.await.expect("connect task panicked")
    }

    #[tokio::test]
    async fn retries_until_instance_is_available() {
        let clock = MockClock::new();
        let (opener, attempts) = opener(3);
        let connector = PipeConnector::new(opener, Some(Duration::from_secs(1)), Duration::from_millis(50))
            .with_clock(Arc::new(clock.clone()));
        let address = PipeAddress::local("svc").unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(async move { connector.connect(&address, &cancel).await });
        let stream = drive(&clock, handle).await.unwrap();

        assert_eq!(stream, 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(clock.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test]
    async fn times_out_within_one_quantum_of_the_deadline() {
        let clock = MockClock::new();
        let (opener, _) = opener(u32::MAX);
        let timeout = Duration::from_millis(120);
        let quantum = Duration::from_millis(50);
        let connector =
            PipeConnector::new(opener, Some(timeout), quantum).with_clock(Arc::new(clock.clone()));
        let address = PipeAddress::local("svc").unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(async move { connector.connect(&address, &cancel).await });
        let err = drive(&clock, handle).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectTimeout);
        assert!(clock.elapsed() >= timeout);
        assert!(clock.elapsed() <= timeout + quantum);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let clock = MockClock::new();
        let (opener, attempts) = opener(u32::MAX);
        let connector = PipeConnector::new(opener, None, Duration::from_secs(3600))
            .with_clock(Arc::new(clock.clone()));
        let address = PipeAddress::local("svc").unwrap();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move { connector.connect(&address, &token).await });
        while clock.pending_sleepers() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_slow_open() {
        let connector = PipeConnector::new(StuckOpener, None, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            connector
                .connect(&PipeAddress::local("svc").unwrap(), &token)
                .await
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        let err = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cancellation observed while opening")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_attempts() {
        let (opener, attempts) = opener(0);
        let connector = PipeConnector::new(opener, None, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = connector
            .connect(&PipeAddress::local("svc").unwrap(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hard_failure_is_not_retried() {
        let connector = PipeConnector::new(DeniedOpener, None, Duration::from_millis(10));
        let err = connector
            .connect(&PipeAddress::local("svc").unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectRefused);
    }
}
