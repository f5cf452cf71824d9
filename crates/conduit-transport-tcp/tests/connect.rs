use conduit_core::{ConnectionFactory, EndPoint, ErrorKind, ListenerFactory};
use conduit_transport_tcp::{TcpConnectionFactory, TcpListenerFactory};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connecting_to_closed_port_is_refused() -> anyhow::Result<()> {
    let listeners = TcpListenerFactory::default();
    let listener = listeners.bind(&EndPoint::network("127.0.0.1", 0)).await?;
    let endpoint = listener.endpoint().clone();
    listener.unbind().await;
    drop(listener);

    let err = TcpConnectionFactory::default()
        .connect(&endpoint, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectRefused);
    Ok(())
}

#[tokio::test]
async fn cancelled_token_aborts_connect() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = TcpConnectionFactory::default()
        .connect(&EndPoint::network("127.0.0.1", 9), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn non_network_endpoints_are_unsupported() -> anyhow::Result<()> {
    let factory = TcpConnectionFactory::default();
    let pipe = EndPoint::from(conduit_core::PipeAddress::local("svc")?);
    assert!(!factory.supports(&pipe));
    let err = factory
        .connect(&pipe, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedEndpoint);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn accepted_connection_reports_endpoints() -> anyhow::Result<()> {
    let listener = TcpListenerFactory::default()
        .bind(&EndPoint::network("127.0.0.1", 0))
        .await?;
    let factory = TcpConnectionFactory::default();
    let cancel = CancellationToken::new();
    let (client, server) = tokio::join!(
        factory.connect(listener.endpoint(), &cancel),
        listener.accept(&cancel),
    );
    let client = client?;
    let server = server?.expect("listener still bound");

    assert_eq!(client.remote_endpoint(), Some(listener.endpoint()));
    assert_eq!(server.local_endpoint(), Some(listener.endpoint()));

    listener.unbind().await;
    assert!(listener.accept(&cancel).await?.is_none());

    client.dispose().await;
    server.dispose().await;
    Ok(())
}
