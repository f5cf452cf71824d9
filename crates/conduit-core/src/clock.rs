use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// 时钟返回的统一睡眠 Future。
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 可注入的时钟。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 命名管道的建连重试机需要“当前时间 + 等待一个量子”两项能力；直接调用系统时钟会让
///   超时与取消测试依赖真实的墙钟等待；
/// - 以 trait 注入后，生产环境使用 [`SystemClock`]，测试使用 [`MockClock`] 手动推进。
///
/// ## 契约（What）
/// - `now` 单调不减；
/// - `sleep(d)` 返回的 Future 至少在 `d` 之后才完成。
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> Sleep;
}

/// 委托给 Tokio 时间驱动的系统时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// 手动推进的虚拟时钟。
///
/// # 教案级注释
///
/// ## 行为（How）
/// - 内部维护自构造起的虚拟偏移量与待唤醒的睡眠登记表；
/// - [`MockClock::advance`] 增加偏移量，并按登记顺序唤醒所有到期的睡眠；
/// - 到期判断与 waker 登记在同一把锁内完成，推进与轮询交错时不会丢失唤醒。
///
/// ## 契约（What）
/// - 克隆体共享同一时间线；
/// - 被提前 Drop 的睡眠会从登记表移除；
/// - [`MockClock::pending_sleepers`] 暴露当前挂起的睡眠数量，测试可据此等待被测代码进入等待点。
#[derive(Clone, Debug)]
pub struct MockClock {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug)]
struct MockState {
    origin: Instant,
    elapsed: Duration,
    sleepers: Vec<Sleeper>,
    next_id: u64,
}

#[derive(Debug)]
struct Sleeper {
    id: u64,
    deadline: Duration,
    waker: Option<Waker>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::with_start(Instant::now())
    }

    pub fn with_start(origin: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                origin,
                elapsed: Duration::ZERO,
                sleepers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// 推进虚拟时间并唤醒到期的睡眠。
    pub fn advance(&self, delta: Duration) {
        if delta.is_zero() {
            return;
        }
        let mut to_wake = Vec::new();
        {
            let mut state = self.inner.lock();
            state.elapsed = state.elapsed.saturating_add(delta);
            let elapsed = state.elapsed;
            state.sleepers.retain_mut(|sleeper| {
                if elapsed >= sleeper.deadline {
                    if let Some(waker) = sleeper.waker.take() {
                        to_wake.push(waker);
                    }
                    false
                } else {
                    true
                }
            });
        }
        for waker in to_wake {
            waker.wake();
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.lock().elapsed
    }

    /// 当前尚未到期的睡眠数量。
    pub fn pending_sleepers(&self) -> usize {
        self.inner.lock().sleepers.len()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        state.origin + state.elapsed
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let mut state = self.inner.lock();
        let deadline = state.elapsed.saturating_add(duration);
        let id = state.next_id;
        state.next_id += 1;
        if !duration.is_zero() {
            state.sleepers.push(Sleeper {
                id,
                deadline,
                waker: None,
            });
        }
        Box::pin(MockSleep {
            clock: Arc::clone(&self.inner),
            id,
            deadline,
        })
    }
}

struct MockSleep {
    clock: Arc<Mutex<MockState>>,
    id: u64,
    deadline: Duration,
}

impl Future for MockSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.clock.lock();
        if state.elapsed >= self.deadline {
            return Poll::Ready(());
        }
        match state.sleepers.iter_mut().find(|sleeper| sleeper.id == self.id) {
            Some(sleeper) => {
                let refresh = sleeper
                    .waker
                    .as_ref()
                    .is_none_or(|existing| !existing.will_wake(cx.waker()));
                if refresh {
                    sleeper.waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

impl Drop for MockSleep {
    fn drop(&mut self) {
        let id = self.id;
        self.clock.lock().sleepers.retain(|sleeper| sleeper.id != id);
    }
}
