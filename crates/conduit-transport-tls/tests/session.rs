use std::{
    sync::{Arc, Once},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use conduit_core::{
    Connection, ConnectionState, ErrorKind, InherentKeepAlive, OperationKind, RawTransport,
    StreamOperations, StreamTransport, TransportError, TransportOptions,
};
use conduit_transport_tls::{TlsClient, TlsInfo, TlsServer};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::{
    ClientConfig, RootCertStore, ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use tokio_util::sync::CancellationToken;

const MEMORY: StreamOperations = StreamOperations {
    read: OperationKind::new("conduit.memory.read_failed", "memory read"),
    write: OperationKind::new("conduit.memory.write_failed", "memory write"),
    shutdown: OperationKind::new("conduit.memory.shutdown_failed", "memory shutdown"),
};

const BOUND: Duration = Duration::from_secs(5);

fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// 自签名证书：服务端配置与只信任该证书的客户端配置。
fn self_signed(common_name: &str) -> anyhow::Result<(Arc<ServerConfig>, Arc<ClientConfig>)> {
    ensure_crypto_provider();
    let mut params = CertificateParams::new(vec![common_name.to_string()])?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    let key_pair = KeyPair::generate()?;
    let certificate = params.self_signed(&key_pair)?;

    let cert_der = CertificateDer::from(certificate.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
        .map_err(|err| anyhow::anyhow!("parse private key: {err}"))?;
    let server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .context("build server config")?;

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).context("trust certificate")?;
    let client = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok((Arc::new(server), Arc::new(client)))
}

fn memory_pair() -> (Connection, Connection) {
    let (left, right) = tokio::io::duplex(16 * 1024);
    let wrap = |stream: tokio::io::DuplexStream| {
        Connection::builder(Arc::new(StreamTransport::new("memory", stream, MEMORY)))
            .property(InherentKeepAlive(false))
            .start()
    };
    (wrap(left), wrap(right))
}

async fn handshake(
    client: &TlsClient,
    server: &TlsServer,
) -> anyhow::Result<(Connection, Connection)> {
    let (left, right) = memory_pair();
    let cancel = CancellationToken::new();
    let (client, server) = tokio::join!(
        client.connect(left, "localhost", &cancel),
        server.accept(right, &cancel),
    );
    Ok((client?, server?))
}

/// 内存传输，`fail` 触发后读取以 `IoFailure` 失败。
struct Faulty {
    inner: StreamTransport<tokio::io::DuplexStream>,
    fail: CancellationToken,
}

#[async_trait]
impl RawTransport for Faulty {
    fn scheme(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        tokio::select! {
            biased;
            _ = self.fail.cancelled() => Err(TransportError::new(
                ErrorKind::IoFailure,
                "conduit.memory.inner_failed",
                "memory link failed",
            )),
            read = self.inner.read(buf) => read,
        }
    }

    async fn write(&self, data: Bytes) -> Result<(), TransportError> {
        self.inner.write(data).await
    }

    fn close(&self) {
        self.inner.close();
    }

    async fn release(&self) {
        self.inner.release().await;
    }
}

async fn read_exact(connection: &Connection, len: usize) -> anyhow::Result<Vec<u8>> {
    let mut received = Vec::with_capacity(len);
    while received.len() < len {
        let chunk = tokio::time::timeout(BOUND, connection.transport().input().read())
            .await
            .context("read within bound")??
            .context("stream ended early")?;
        received.extend_from_slice(&chunk);
    }
    Ok(received)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bytes_cross_the_tls_session_unchanged() -> anyhow::Result<()> {
    let (server_config, client_config) = self_signed("localhost")?;
    let (client, server) =
        handshake(&TlsClient::new(client_config), &TlsServer::new(server_config)).await?;

    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 241) as u8).collect();
    for chunk in payload.chunks(3_000) {
        client
            .transport()
            .output()
            .write(Bytes::copy_from_slice(chunk))
            .await?;
    }
    assert_eq!(read_exact(&server, payload.len()).await?, payload);

    server
        .transport()
        .output()
        .write(Bytes::from_static(b"ack"))
        .await?;
    assert_eq!(read_exact(&client, 3).await?, b"ack");

    client.dispose().await;
    server.dispose().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn outer_connection_inherits_identity_and_annotations() -> anyhow::Result<()> {
    let (server_config, client_config) = self_signed("localhost")?;
    let (left, right) = memory_pair();
    let inner_id = left.id();
    let (tls_client, tls_server) = (TlsClient::new(client_config), TlsServer::new(server_config));
    let cancel = CancellationToken::new();
    let (client, server) = tokio::join!(
        tls_client.connect(left, "localhost", &cancel),
        tls_server.accept(right, &cancel),
    );
    let (client, server) = (client?, server?);

    assert_eq!(client.id(), inner_id);
    assert_eq!(client.properties().get::<InherentKeepAlive>(), Some(&InherentKeepAlive(false)));
    let client_info = client.properties().get::<TlsInfo>().context("client tls info")?;
    assert_eq!(client_info.server_name.as_deref(), Some("localhost"));
    assert!(client_info.protocol_version.is_some());
    let server_info = server.properties().get::<TlsInfo>().context("server tls info")?;
    assert_eq!(server_info.server_name.as_deref(), Some("localhost"));

    client.dispose().await;
    server.dispose().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disposing_outer_ends_peer_stream() -> anyhow::Result<()> {
    let (server_config, client_config) = self_signed("localhost")?;
    let (client, server) =
        handshake(&TlsClient::new(client_config), &TlsServer::new(server_config)).await?;

    client.dispose().await;
    assert_eq!(client.state(), ConnectionState::Closed);

    let eof = tokio::time::timeout(BOUND, server.transport().input().read())
        .await
        .context("peer observes close")??;
    assert_eq!(eof, None);
    server.dispose().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inner_failure_reaches_outer_input_once() -> anyhow::Result<()> {
    let (server_config, client_config) = self_signed("localhost")?;
    let (left, right) = tokio::io::duplex(16 * 1024);
    let fail = CancellationToken::new();
    let faulty = Faulty {
        inner: StreamTransport::new("memory", left, MEMORY),
        fail: fail.clone(),
    };
    let left = Connection::builder(Arc::new(faulty)).start();
    let right = Connection::builder(Arc::new(StreamTransport::new("memory", right, MEMORY))).start();

    let (tls_client, tls_server) = (TlsClient::new(client_config), TlsServer::new(server_config));
    let cancel = CancellationToken::new();
    let (client, server) = tokio::join!(
        tls_client.connect(left, "localhost", &cancel),
        tls_server.accept(right, &cancel),
    );
    let (client, server) = (client?, server?);

    fail.cancel();
    let err = tokio::time::timeout(BOUND, client.transport().input().read())
        .await
        .context("outer read observes inner failure")?
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
    assert_eq!(err.code(), "conduit.memory.inner_failed");
    assert_eq!(client.transport().input().read().await?, None);

    client.dispose().await;
    server.dispose().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn untrusted_certificate_fails_as_protocol_error() -> anyhow::Result<()> {
    let (server_config, _) = self_signed("localhost")?;
    let (_, stranger) = self_signed("localhost")?;
    let (left, right) = memory_pair();
    let (tls_client, tls_server) = (TlsClient::new(stranger), TlsServer::new(server_config));
    let cancel = CancellationToken::new();
    let (client, server) = tokio::join!(
        tls_client.connect(left, "localhost", &cancel),
        tls_server.accept(right, &cancel),
    );

    assert_eq!(client.unwrap_err().kind(), ErrorKind::ProtocolFailure);
    assert!(server.is_err());
    Ok(())
}

#[tokio::test]
async fn invalid_server_name_is_rejected() -> anyhow::Result<()> {
    let (_, client_config) = self_signed("localhost")?;
    let (left, _right) = memory_pair();
    let err = TlsClient::new(client_config)
        .connect(left, "not a host name!", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidEndpoint);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_peer_hits_handshake_timeout() -> anyhow::Result<()> {
    let (server_config, _) = self_signed("localhost")?;
    let options = TransportOptions::from_toml_str("[tls]\nhandshake_timeout_ms = 100\n")?;
    let server = TlsServer::new(server_config).with_options(options, Default::default());
    let (_silent, right) = memory_pair();

    let err = server
        .accept(right, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectTimeout);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replaced_config_applies_to_new_handshakes_only() -> anyhow::Result<()> {
    let (first_server, first_client) = self_signed("localhost")?;
    let (second_server, second_client) = self_signed("localhost")?;
    let server = TlsServer::new(first_server);

    let (old_client, old_server) = handshake(&TlsClient::new(first_client.clone()), &server).await?;

    server.replace_config(second_server.clone());
    assert!(Arc::ptr_eq(&server.config_snapshot(), &second_server));

    let (new_client, new_server) = handshake(&TlsClient::new(second_client), &server).await?;

    let (left, right) = memory_pair();
    let stale_client = TlsClient::new(first_client);
    let cancel = CancellationToken::new();
    let (stale, _) = tokio::join!(
        stale_client.connect(left, "localhost", &cancel),
        server.accept(right, &cancel),
    );
    assert_eq!(stale.unwrap_err().kind(), ErrorKind::ProtocolFailure);

    old_client
        .transport()
        .output()
        .write(Bytes::from_static(b"still alive"))
        .await?;
    assert_eq!(read_exact(&old_server, 11).await?, b"still alive");

    for connection in [old_client, old_server, new_client, new_server] {
        connection.dispose().await;
    }
    Ok(())
}
