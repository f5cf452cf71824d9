//! 回显服务演示：`cargo run -p conduit-transport-tcp --example echo -- 127.0.0.1:7000 [options.toml]`
//!
//! 日志级别由 `RUST_LOG` 控制，默认 `info`；例如 `RUST_LOG=conduit_core=debug` 可观察生命周期迁移。

use std::net::SocketAddr;

use anyhow::Context;
use conduit_core::{BufferPool, Connection, EndPoint, ListenerFactory, TransportOptions};
use conduit_transport_tcp::TcpListenerFactory;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:7000".to_owned())
        .parse()
        .context("listen address")?;
    let options = match args.next() {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
            TransportOptions::from_toml_str(&text)?
        }
        None => TransportOptions::default(),
    };

    let pool = BufferPool::from_options(&options.buffer);
    let listener = TcpListenerFactory::new(options, pool)
        .bind(&EndPoint::from(addr))
        .await?;
    info!(endpoint = %listener.endpoint(), "echo server listening");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        }
    });

    loop {
        let accepted = match listener.accept(&cancel).await {
            Ok(Some(connection)) => connection,
            Ok(None) => break,
            Err(err) if err.kind() == conduit_core::ErrorKind::Cancelled => break,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        tokio::spawn(echo(accepted));
    }
    listener.unbind().await;
    info!("echo server stopped");
    Ok(())
}

async fn echo(connection: Connection) {
    info!(connection = %connection.id(), remote = ?connection.remote_endpoint(), "client connected");
    loop {
        match connection.transport().input().read().await {
            Ok(Some(chunk)) => {
                if let Err(err) = connection.transport().output().write(chunk).await {
                    warn!(connection = %connection.id(), error = %err, "echo write failed");
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(connection = %connection.id(), error = %err, "echo read failed");
                break;
            }
        }
    }
    connection.dispose().await;
    info!(connection = %connection.id(), "client disconnected");
}
