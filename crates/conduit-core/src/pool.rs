use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::options::BufferOptions;

/// 接收泵使用的读缓冲池。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每次原始读取都需要一块可写缓冲；池化后，已被应用消费完的块可以回收复用；
/// - 池作为显式对象经由工厂传入适配器，不存在进程级单例。
///
/// ## 行为（How）
/// - `acquire` 优先复用空闲缓冲，并保证返回的缓冲至少有 `buffer_size` 的空闲容量；
/// - `release` 仅回收“唯一持有”的缓冲（`BytesMut` 在 `split().freeze()` 之后仍保留尾部容量），
///   超过 `max_pooled` 的部分直接丢弃。
///
/// ## 契约（What）
/// - 克隆体共享同一个空闲列表；
/// - 池内缓冲总数不超过 `max_pooled`。
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffer_size: usize,
    max_pooled: usize,
    idle: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_size: buffer_size.max(1),
                max_pooled,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn from_options(options: &BufferOptions) -> Self {
        Self::new(options.read_buffer_size, options.max_pooled)
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// 取出一块清空后的缓冲。
    pub fn acquire(&self) -> BytesMut {
        let reused = self.inner.idle.lock().pop();
        let mut buffer = reused.unwrap_or_default();
        buffer.clear();
        buffer.reserve(self.inner.buffer_size);
        buffer
    }

    /// 归还缓冲。
    pub fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        if buffer.capacity() == 0 {
            return;
        }
        let mut idle = self.inner.idle.lock();
        if idle.len() < self.inner.max_pooled {
            idle.push(buffer);
        }
    }

    /// 当前空闲缓冲数量。
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::from_options(&BufferOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffers_are_reused_up_to_limit() {
        let pool = BufferPool::new(128, 1);
        let first = pool.acquire();
        let second = pool.acquire();
        assert!(first.capacity() >= 128);

        pool.release(first);
        pool.release(second);
        assert_eq!(pool.idle(), 1);

        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 128);
        assert_eq!(pool.idle(), 0);
    }
}
