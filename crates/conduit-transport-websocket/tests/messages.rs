use anyhow::Context;
use bytes::Bytes;
use conduit_core::{
    BufferPool, ConnectionFactory, ConnectionListener, EndPoint, ErrorKind, ListenerFactory,
    TransportOptions, UriAddress,
};
use conduit_tck::{BOUND, read_exact};
use conduit_transport_websocket::{WebSocketConnectionFactory, WebSocketListenerFactory};
use futures_util::SinkExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

async fn bind(options: TransportOptions) -> anyhow::Result<Box<dyn ConnectionListener>> {
    let endpoint = EndPoint::Uri(UriAddress::parse("ws://127.0.0.1:0/feed")?);
    Ok(WebSocketListenerFactory::new(options, BufferPool::default())
        .bind(&endpoint)
        .await?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn text_and_binary_messages_arrive_as_raw_bytes() -> anyhow::Result<()> {
    let listener = bind(TransportOptions::default()).await?;
    let url = listener.endpoint().to_string();
    let cancel = CancellationToken::new();

    let (client, server) = tokio::join!(connect_async(url), listener.accept(&cancel));
    let (mut client, _) = client?;
    let server = server?.context("listener bound")?;
    assert!(server.has_inherent_keep_alive());

    client.send(Message::text("hello ")).await?;
    client.send(Message::Ping(Bytes::from_static(b"p"))).await?;
    client.send(Message::Binary(Bytes::from_static(b"world"))).await?;
    assert_eq!(read_exact(&server, 11).await?, b"hello world");

    client.send(Message::Close(None)).await?;
    let eof = tokio::time::timeout(BOUND, server.transport().input().read()).await??;
    assert_eq!(eof, None);

    server.dispose().await;
    listener.unbind().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_message_fails_as_protocol_error() -> anyhow::Result<()> {
    let options = TransportOptions::from_toml_str("[websocket]\nmax_message_size = 8\n")?;
    let listener = bind(options).await?;
    let url = listener.endpoint().to_string();
    let cancel = CancellationToken::new();

    let (client, server) = tokio::join!(connect_async(url), listener.accept(&cancel));
    let (mut client, _) = client?;
    let server = server?.context("listener bound")?;

    client.send(Message::Binary(Bytes::from_static(b"12345678"))).await?;
    assert_eq!(read_exact(&server, 8).await?, b"12345678");
    client.send(Message::Binary(Bytes::from_static(b"123456789"))).await?;

    let err = tokio::time::timeout(BOUND, server.transport().input().read())
        .await?
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
    assert_eq!(err.code(), "conduit.websocket.message_too_large");

    server.dispose().await;
    listener.unbind().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_path_is_refused_without_stopping_the_listener() -> anyhow::Result<()> {
    let listener = bind(TransportOptions::default()).await?;
    let EndPoint::Uri(bound) = listener.endpoint().clone() else {
        anyhow::bail!("websocket listener reported a non-uri endpoint");
    };
    let wrong = EndPoint::Uri(UriAddress::parse(
        bound.as_str().replace("/feed", "/elsewhere"),
    )?);
    let factory = WebSocketConnectionFactory::default();
    let cancel = CancellationToken::new();

    let (accepted, client) = tokio::join!(listener.accept(&cancel), async {
        let refused = factory.connect(&wrong, &cancel).await;
        assert_eq!(refused.unwrap_err().kind(), ErrorKind::ConnectRefused);
        factory.connect(listener.endpoint(), &cancel).await
    });
    let server = accepted?.context("listener bound")?;
    let client = client?;
    assert_eq!(client.remote_endpoint(), Some(listener.endpoint()));

    client.dispose().await;
    server.dispose().await;
    listener.unbind().await;
    Ok(())
}

#[tokio::test]
async fn secure_and_foreign_endpoints_are_unsupported() -> anyhow::Result<()> {
    let factory = WebSocketConnectionFactory::default();
    let secure = EndPoint::Uri(UriAddress::parse("wss://127.0.0.1:9/feed")?);
    assert!(!factory.supports(&secure));
    assert!(!factory.supports(&EndPoint::network("127.0.0.1", 9)));

    let err = factory
        .connect(&secure, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedEndpoint);
    Ok(())
}
