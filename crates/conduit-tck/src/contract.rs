//! 与传输无关的连接契约。
//!
//! 每个断言独立建立连接并在结束前释放，可在同一进程内并行运行。

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, ensure};
use bytes::Bytes;
use conduit_core::{ConnectionState, ErrorKind};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::harness::{BOUND, TransportUnderTest, read_exact};

/// 判定“生产者已被挂起”的静默时长。
const STALL: Duration = Duration::from_millis(300);
/// 背压必须在累计写入达到该值之前生效。
const BACKPRESSURE_LIMIT: usize = 256 * 1024 * 1024;

/// 双向字节按序、无损到达。
pub async fn round_trip(transport: &TransportUnderTest) -> Result<()> {
    let (client, server) = transport.connected_pair().await?;
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();

    for chunk in payload.chunks(4_093) {
        client
            .transport()
            .output()
            .write(Bytes::copy_from_slice(chunk))
            .await
            .context("client write")?;
    }
    ensure!(read_exact(&server, payload.len()).await? == payload, "payload corrupted");

    server
        .transport()
        .output()
        .write(Bytes::from_static(b"pong"))
        .await
        .context("server write")?;
    ensure!(read_exact(&client, 4).await? == b"pong", "reply corrupted");

    client.dispose().await;
    server.dispose().await;
    Ok(())
}

/// 本端完成发送方向后连接整体收尾，对端读到 EOF 而非错误。
pub async fn send_first_termination(transport: &TransportUnderTest) -> Result<()> {
    let (client, server) = transport.connected_pair().await?;
    client.transport().output().complete(None);

    tokio::time::timeout(BOUND, client.closed())
        .await
        .context("local side closes after finishing output")?;
    ensure!(
        client.terminal_error().is_none(),
        "clean finish recorded an error: {:?}",
        client.terminal_error()
    );

    let eof = tokio::time::timeout(BOUND, server.transport().input().read())
        .await
        .context("peer observes termination")?;
    match eof {
        Ok(None) => {}
        Err(err) if err.is_graceful() => {}
        other => anyhow::bail!("peer expected EOF, got {other:?}"),
    }

    server.dispose().await;
    ensure!(server.state() == ConnectionState::Closed, "peer not closed");
    Ok(())
}

/// `dispose` 幂等且可并发调用；释放后写入失败、读取为 EOF。
pub async fn dispose_is_idempotent(transport: &TransportUnderTest) -> Result<()> {
    let (client, server) = transport.connected_pair().await?;
    let client = Arc::new(client);

    let racers: Vec<_> = (0..4)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.dispose().await })
        })
        .collect();
    tokio::time::timeout(BOUND, async {
        for racer in racers {
            racer.await?;
        }
        Ok::<_, tokio::task::JoinError>(())
    })
    .await
    .context("concurrent dispose within bound")??;

    ensure!(client.state() == ConnectionState::Closed, "state after dispose");
    client.dispose().await;
    ensure!(client.state() == ConnectionState::Closed, "state after second dispose");

    let late = client
        .transport()
        .output()
        .write(Bytes::from_static(b"late"))
        .await;
    ensure!(late.is_err(), "write after dispose succeeded");
    ensure!(
        client.transport().input().read().await?.is_none(),
        "read after dispose returned data"
    );

    server.dispose().await;
    Ok(())
}

/// `abort` 不排空即关闭，对端以 EOF 或优雅类错误观察到结束。
pub async fn abort_terminates_peer(transport: &TransportUnderTest) -> Result<()> {
    let (client, server) = transport.connected_pair().await?;
    client.abort();
    tokio::time::timeout(BOUND, client.closed())
        .await
        .context("aborted side closes")?;

    let observed = tokio::time::timeout(BOUND, server.transport().input().read())
        .await
        .context("peer observes abort")?;
    match observed {
        Ok(None) => {}
        Err(err) if err.kind().is_graceful() => {}
        other => anyhow::bail!("peer expected EOF or abort, got {other:?}"),
    }
    server.dispose().await;
    Ok(())
}

/// 消费方不读取时生产方在有界的写入量内被挂起，消费方恢复读取后全部数据到达。
pub async fn backpressure_bounds_producer(transport: &TransportUnderTest) -> Result<()> {
    let (client, server) = transport.connected_pair().await?;
    let chunk = Bytes::from(vec![0x5a_u8; 16 * 1024]);

    // `write` 先入队再等待背压解除，超时的那一块同样已经入队。
    let mut queued = 0usize;
    let stalled = loop {
        if queued >= BACKPRESSURE_LIMIT {
            break false;
        }
        let write = tokio::time::timeout(STALL, client.transport().output().write(chunk.clone())).await;
        queued += chunk.len();
        match write {
            Ok(result) => result.context("write while peer idle")?,
            Err(_) => break true,
        }
    };
    ensure!(stalled, "producer never suspended after {queued} bytes");
    debug!(queued, "producer suspended");

    let received = read_exact(&server, queued).await?;
    ensure!(received.iter().all(|b| *b == 0x5a), "payload corrupted under backpressure");

    tokio::time::timeout(BOUND, client.transport().output().write(chunk.clone()))
        .await
        .context("producer resumes after drain")??;
    read_exact(&server, chunk.len()).await?;

    client.dispose().await;
    server.dispose().await;
    Ok(())
}

/// 解绑后挂起的与新的 `accept` 都返回 `None`，重复解绑无副作用。
pub async fn unbind_ends_accept(transport: &TransportUnderTest) -> Result<()> {
    let listener = Arc::new(transport.bind().await?);
    let cancel = CancellationToken::new();

    let pending = tokio::spawn({
        let listener = Arc::clone(&listener);
        let cancel = cancel.clone();
        async move { listener.accept(&cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    listener.unbind().await;

    let accepted = tokio::time::timeout(BOUND, pending)
        .await
        .context("pending accept wakes on unbind")??
        .context("accept after unbind")?;
    ensure!(accepted.is_none(), "pending accept produced a connection");
    ensure!(listener.accept(&cancel).await?.is_none(), "accept after unbind");
    listener.unbind().await;
    Ok(())
}

/// 已取消的令牌让 `accept` 以 `Cancelled` 返回。
pub async fn cancelled_accept(transport: &TransportUnderTest) -> Result<()> {
    let listener = transport.bind().await?;
    let cancel = CancellationToken::new();
    cancel.cancel();
    match listener.accept(&cancel).await {
        Err(err) if err.kind() == ErrorKind::Cancelled => {}
        other => anyhow::bail!("expected Cancelled, got {other:?}"),
    }
    listener.unbind().await;
    Ok(())
}
