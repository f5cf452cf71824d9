use std::sync::Arc;

use conduit_core::{EndPoint, UriAddress};
use conduit_tck::{TransportUnderTest, contract, tls};
use conduit_transport_websocket::{WebSocketConnectionFactory, WebSocketListenerFactory};

fn websocket() -> TransportUnderTest {
    TransportUnderTest::new(
        Arc::new(WebSocketListenerFactory::default()),
        Arc::new(WebSocketConnectionFactory::default()),
        || match UriAddress::parse("ws://127.0.0.1:0/tck") {
            Ok(uri) => EndPoint::Uri(uri),
            Err(err) => panic!("static uri rejected: {err}"),
        },
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn round_trip() -> anyhow::Result<()> {
    contract::round_trip(&websocket()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_first_termination() -> anyhow::Result<()> {
    contract::send_first_termination(&websocket()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_is_idempotent() -> anyhow::Result<()> {
    contract::dispose_is_idempotent(&websocket()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_terminates_peer() -> anyhow::Result<()> {
    contract::abort_terminates_peer(&websocket()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backpressure_bounds_producer() -> anyhow::Result<()> {
    contract::backpressure_bounds_producer(&websocket()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unbind_ends_accept() -> anyhow::Result<()> {
    contract::unbind_ends_accept(&websocket()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_accept() -> anyhow::Result<()> {
    contract::cancelled_accept(&websocket()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tls_over_websocket_is_transparent() -> anyhow::Result<()> {
    tls::tls_is_transparent(&websocket()).await
}
