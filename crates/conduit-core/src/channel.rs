use std::{
    collections::VecDeque,
    fmt,
    future::poll_fn,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{error::TransportError, options::ChannelOptions};

/// 双工字节通道的一端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 传输适配器与应用之间需要一个与具体传输无关的交换面：应用只看见“输入读端 + 输出写端”，
///   泵循环只看见另一端的对应读写端；
/// - 两个方向相互独立，一侧 EOF 不阻塞另一侧的数据流动（半关闭）。
///
/// ## 结构（How）
/// - [`DuplexChannel::pair`] 创建两条单向队列并交叉连接：应用端的 `output` 与传输端的 `input`
///   共享一条队列，反之亦然；
/// - 每条队列都是有界的：缓冲字节数达到暂停阈值后写入方挂起，回落到恢复阈值后唤醒。
///
/// ## 契约（What）
/// - 队列语义为单生产者/单消费者；句柄可克隆，但同一时刻每侧只应有一个进行中的调用；
/// - 最后一个写端句柄被 Drop 时视作无错误完成，最后一个读端句柄被 Drop 时视作消费方离开。
#[derive(Clone, Debug)]
pub struct DuplexChannel {
    input: PipeReader,
    output: PipeWriter,
}

impl DuplexChannel {
    /// 创建一对背靠背连接的通道端：`(application, transport)`。
    ///
    /// `input` 约束传输写入、应用读取的方向，`output` 约束应用写入、传输读取的方向。
    pub fn pair(input: ChannelOptions, output: ChannelOptions) -> (DuplexChannel, DuplexChannel) {
        let (transport_writer, application_reader) = pipe(input);
        let (application_writer, transport_reader) = pipe(output);
        (
            DuplexChannel {
                input: application_reader,
                output: application_writer,
            },
            DuplexChannel {
                input: transport_reader,
                output: transport_writer,
            },
        )
    }

    /// 以已有的读写端组装通道。
    pub fn from_parts(input: PipeReader, output: PipeWriter) -> Self {
        Self { input, output }
    }

    pub fn input(&self) -> &PipeReader {
        &self.input
    }

    pub fn output(&self) -> &PipeWriter {
        &self.output
    }

    pub fn into_parts(self) -> (PipeReader, PipeWriter) {
        (self.input, self.output)
    }
}

/// 创建一条单向有界队列，返回 `(writer, reader)`。
pub fn pipe(options: ChannelOptions) -> (PipeWriter, PipeReader) {
    let pause = options.pause_threshold.max(1);
    let resume = options.resume_threshold.min(pause);
    let shared = Arc::new(Mutex::new(PipeState {
        queue: VecDeque::new(),
        buffered: 0,
        pause_threshold: pause,
        resume_threshold: resume,
        paused: false,
        writer_completion: None,
        error_delivered: false,
        reader_completed: false,
        reader_reason: None,
        reader_waker: None,
        writer_waker: None,
        writers: 1,
        readers: 1,
    }));
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

struct PipeState {
    queue: VecDeque<Bytes>,
    buffered: usize,
    pause_threshold: usize,
    resume_threshold: usize,
    paused: bool,
    /// `Some(None)` 为无错误完成，`Some(Some(e))` 携带终止错误。
    writer_completion: Option<Option<TransportError>>,
    error_delivered: bool,
    reader_completed: bool,
    reader_reason: Option<TransportError>,
    reader_waker: Option<Waker>,
    writer_waker: Option<Waker>,
    writers: usize,
    readers: usize,
}

impl PipeState {
    fn complete_writer(&mut self, error: Option<TransportError>) -> Vec<Waker> {
        if self.writer_completion.is_some() {
            return Vec::new();
        }
        self.writer_completion = Some(error);
        self.take_wakers()
    }

    fn complete_reader(&mut self, reason: Option<TransportError>) -> Vec<Waker> {
        if self.reader_completed {
            return Vec::new();
        }
        self.reader_completed = true;
        self.reader_reason = reason;
        self.queue.clear();
        self.buffered = 0;
        self.paused = false;
        self.take_wakers()
    }

    fn take_wakers(&mut self) -> Vec<Waker> {
        self.reader_waker
            .take()
            .into_iter()
            .chain(self.writer_waker.take())
            .collect()
    }

    fn reader_gone_error(&self) -> TransportError {
        self.reader_reason
            .clone()
            .unwrap_or_else(TransportError::reader_completed)
    }
}

fn store_waker(slot: &mut Option<Waker>, waker: &Waker) {
    if slot.as_ref().is_some_and(|existing| existing.will_wake(waker)) {
        return;
    }
    *slot = Some(waker.clone());
}

fn wake_all(wakers: Vec<Waker>) {
    for waker in wakers {
        waker.wake();
    }
}

/// 队列的生产端。
pub struct PipeWriter {
    shared: Arc<Mutex<PipeState>>,
}

impl PipeWriter {
    /// 等待队列可写。
    ///
    /// - 队列处于暂停状态时返回 `Pending`，直到消费方排空到恢复阈值；
    /// - 写端已完成时返回 `write_after_complete`；
    /// - 读端已完成时返回读端给出的原因（缺省为 `TransportAborted`）。
    pub fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), TransportError>> {
        let mut state = self.shared.lock();
        if state.writer_completion.is_some() {
            return Poll::Ready(Err(TransportError::write_after_complete()));
        }
        if state.reader_completed {
            return Poll::Ready(Err(state.reader_gone_error()));
        }
        if state.paused {
            store_waker(&mut state.writer_waker, cx.waker());
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    /// 立即入队，不等待背压；由 [`PipeWriter::poll_ready`] 负责节流。
    pub fn push(&self, chunk: Bytes) -> Result<(), TransportError> {
        let waker = {
            let mut state = self.shared.lock();
            if state.writer_completion.is_some() {
                return Err(TransportError::write_after_complete());
            }
            if state.reader_completed {
                return Err(state.reader_gone_error());
            }
            if chunk.is_empty() {
                return Ok(());
            }
            state.buffered += chunk.len();
            state.queue.push_back(chunk);
            if state.buffered >= state.pause_threshold {
                state.paused = true;
            }
            state.reader_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// 等待此前入队的数据被消费到恢复阈值以下。
    pub fn poll_flush(&self, cx: &mut Context<'_>) -> Poll<Result<(), TransportError>> {
        let mut state = self.shared.lock();
        if state.reader_completed {
            return Poll::Ready(Err(state.reader_gone_error()));
        }
        if !state.paused || state.writer_completion.is_some() {
            return Poll::Ready(Ok(()));
        }
        store_waker(&mut state.writer_waker, cx.waker());
        Poll::Pending
    }

    /// 写入一个数据块，并在队列暂停期间挂起，直到消费方确认排空。
    ///
    /// 返回即表示该块已被接受且背压已解除，可作为“已确认”信号使用。
    pub async fn write(&self, chunk: Bytes) -> Result<(), TransportError> {
        self.push(chunk)?;
        poll_fn(|cx| self.poll_flush(cx)).await
    }

    /// 标记写端完成；只有第一次调用生效。
    pub fn complete(&self, error: Option<TransportError>) {
        let wakers = self.shared.lock().complete_writer(error);
        wake_all(wakers);
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().writer_completion.is_some()
    }

    /// 读端是否已离开。
    pub fn is_reader_completed(&self) -> bool {
        self.shared.lock().reader_completed
    }

    /// 当前队列中尚未被消费的字节数。
    pub fn buffered(&self) -> usize {
        self.shared.lock().buffered
    }
}

impl Clone for PipeWriter {
    fn clone(&self) -> Self {
        self.shared.lock().writers += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let wakers = {
            let mut state = self.shared.lock();
            state.writers -= 1;
            if state.writers == 0 {
                state.complete_writer(None)
            } else {
                Vec::new()
            }
        };
        wake_all(wakers);
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("PipeWriter")
            .field("buffered", &state.buffered)
            .field("paused", &state.paused)
            .field("completed", &state.writer_completion.is_some())
            .finish()
    }
}

/// 队列的消费端。
pub struct PipeReader {
    shared: Arc<Mutex<PipeState>>,
}

impl PipeReader {
    /// 轮询下一个数据块。
    ///
    /// - `Ok(Some(chunk))`：下一个按序到达的数据块；
    /// - `Ok(None)`：写端无错误完成，或本读端已完成；
    /// - `Err(e)`：写端携带错误完成，错误只交付一次，之后返回 `Ok(None)`。
    pub fn poll_read(&self, cx: &mut Context<'_>) -> Poll<Result<Option<Bytes>, TransportError>> {
        let mut state = self.shared.lock();
        if state.reader_completed {
            return Poll::Ready(Ok(None));
        }
        if let Some(chunk) = state.queue.pop_front() {
            state.buffered -= chunk.len();
            let waker = if state.paused && state.buffered <= state.resume_threshold {
                state.paused = false;
                state.writer_waker.take()
            } else {
                None
            };
            drop(state);
            if let Some(waker) = waker {
                waker.wake();
            }
            return Poll::Ready(Ok(Some(chunk)));
        }
        if state.writer_completion.is_none() {
            store_waker(&mut state.reader_waker, cx.waker());
            return Poll::Pending;
        }
        let undelivered = match &state.writer_completion {
            Some(Some(error)) if !state.error_delivered => Some(error.clone()),
            _ => None,
        };
        match undelivered {
            Some(error) => {
                state.error_delivered = true;
                Poll::Ready(Err(error))
            }
            None => Poll::Ready(Ok(None)),
        }
    }

    /// 读取下一个数据块，队列为空时挂起。
    pub async fn read(&self) -> Result<Option<Bytes>, TransportError> {
        poll_fn(|cx| self.poll_read(cx)).await
    }

    /// 消费方离开：丢弃缓冲数据，唤醒挂起的写入方。
    pub fn complete(&self) {
        let wakers = self.shared.lock().complete_reader(None);
        wake_all(wakers);
    }

    /// 携带原因离开；写入方之后的写入会观察到该原因。
    pub fn complete_with(&self, reason: TransportError) {
        let wakers = self.shared.lock().complete_reader(Some(reason));
        wake_all(wakers);
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().reader_completed
    }

    /// 写端是否已完成。
    pub fn is_writer_completed(&self) -> bool {
        self.shared.lock().writer_completion.is_some()
    }
}

impl Clone for PipeReader {
    fn clone(&self) -> Self {
        self.shared.lock().readers += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let wakers = {
            let mut state = self.shared.lock();
            state.readers -= 1;
            if state.readers == 0 {
                state.complete_reader(None)
            } else {
                Vec::new()
            }
        };
        wake_all(wakers);
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("PipeReader")
            .field("buffered", &state.buffered)
            .field("completed", &state.reader_completed)
            .field("writer_completed", &state.writer_completion.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;

    fn small() -> ChannelOptions {
        ChannelOptions::new(8, 4)
    }

    #[tokio::test]
    async fn chunks_flow_in_order_and_eof_follows_completion() {
        let (writer, reader) = pipe(ChannelOptions::default());
        writer.write(Bytes::from_static(b"ab")).await.expect("write");
        writer.write(Bytes::from_static(b"cd")).await.expect("write");
        writer.complete(None);

        assert_eq!(reader.read().await.expect("read"), Some(Bytes::from_static(b"ab")));
        assert_eq!(reader.read().await.expect("read"), Some(Bytes::from_static(b"cd")));
        assert_eq!(reader.read().await.expect("read"), None);
        assert_eq!(reader.read().await.expect("read"), None);
    }

    #[tokio::test]
    async fn error_completion_is_delivered_exactly_once() {
        let (writer, reader) = pipe(ChannelOptions::default());
        writer.complete(Some(TransportError::new(
            ErrorKind::IoFailure,
            "conduit.test.failed",
            "boom",
        )));
        writer.complete(None);

        let err = reader.read().await.unwrap_err();
        assert_eq!(err.code(), "conduit.test.failed");
        assert_eq!(reader.read().await.expect("eof"), None);
    }

    #[tokio::test]
    async fn write_after_complete_fails() {
        let (writer, _reader) = pipe(ChannelOptions::default());
        writer.complete(None);
        let err = writer.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert_eq!(err.code(), "conduit.channel.write_after_complete");
    }

    #[tokio::test]
    async fn writer_suspends_until_reader_drains() {
        let (writer, reader) = pipe(small());
        let pending = tokio::spawn(async move {
            writer.write(Bytes::from_static(b"0123456789")).await?;
            Ok::<_, TransportError>(writer)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished(), "producer must be suspended by backpressure");

        let chunk = reader.read().await.expect("read").expect("chunk");
        assert_eq!(chunk.len(), 10);
        let writer = pending.await.expect("join").expect("write resumed");
        assert_eq!(writer.buffered(), 0);
    }

    #[tokio::test]
    async fn reader_completion_unblocks_suspended_writer_with_reason() {
        let (writer, reader) = pipe(small());
        let pending = tokio::spawn(async move { writer.write(Bytes::from(vec![0u8; 16])).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        reader.complete_with(TransportError::new(
            ErrorKind::IoFailure,
            "conduit.test.send_failed",
            "remote write failed",
        ));
        let err = pending.await.expect("join").unwrap_err();
        assert_eq!(err.code(), "conduit.test.send_failed");
    }

    #[tokio::test]
    async fn completing_reader_wakes_inflight_read() {
        let (_writer, reader) = pipe(ChannelOptions::default());
        let reader = Arc::new(reader);
        let waiting = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move { reader.read().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        reader.complete();
        assert_eq!(waiting.await.expect("join").expect("read"), None);
    }

    #[tokio::test]
    async fn directions_complete_independently() {
        let (application, transport) =
            DuplexChannel::pair(ChannelOptions::default(), ChannelOptions::default());

        application.output().complete(None);
        assert_eq!(transport.input().read().await.expect("read"), None);

        transport
            .output()
            .write(Bytes::from_static(b"still flowing"))
            .await
            .expect("other direction stays open");
        assert_eq!(
            application.input().read().await.expect("read"),
            Some(Bytes::from_static(b"still flowing"))
        );
    }

    #[tokio::test]
    async fn dropping_last_writer_signals_eof() {
        let (writer, reader) = pipe(ChannelOptions::default());
        let clone = writer.clone();
        drop(writer);
        assert!(!reader.is_writer_completed());
        drop(clone);
        assert_eq!(reader.read().await.expect("read"), None);
    }
}
