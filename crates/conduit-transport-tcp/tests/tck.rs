use std::sync::Arc;

use conduit_core::EndPoint;
use conduit_tck::{TransportUnderTest, contract, tls};
use conduit_transport_tcp::{TcpConnectionFactory, TcpListenerFactory};

fn tcp() -> TransportUnderTest {
    TransportUnderTest::new(
        Arc::new(TcpListenerFactory::default()),
        Arc::new(TcpConnectionFactory::default()),
        || EndPoint::network("127.0.0.1", 0),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn round_trip() -> anyhow::Result<()> {
    contract::round_trip(&tcp()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_first_termination() -> anyhow::Result<()> {
    contract::send_first_termination(&tcp()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_is_idempotent() -> anyhow::Result<()> {
    contract::dispose_is_idempotent(&tcp()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_terminates_peer() -> anyhow::Result<()> {
    contract::abort_terminates_peer(&tcp()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backpressure_bounds_producer() -> anyhow::Result<()> {
    contract::backpressure_bounds_producer(&tcp()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unbind_ends_accept() -> anyhow::Result<()> {
    contract::unbind_ends_accept(&tcp()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_accept() -> anyhow::Result<()> {
    contract::cancelled_accept(&tcp()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tls_over_tcp_is_transparent() -> anyhow::Result<()> {
    tls::tls_is_transparent(&tcp()).await
}
