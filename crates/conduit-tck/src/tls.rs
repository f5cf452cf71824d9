//! TLS 透明性：任意传输之上叠加 TLS 后，连接契约保持不变。

use std::sync::{Arc, Once};

use anyhow::{Context, Result, ensure};
use bytes::Bytes;
use conduit_transport_tls::{TlsClient, TlsInfo, TlsServer};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::{
    ClientConfig, RootCertStore, ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use tokio_util::sync::CancellationToken;

use crate::harness::{BOUND, TransportUnderTest, read_exact};

/// 安装进程级 `rustls` 加密提供者。
///
/// # 设计动机（Why）
/// - `rustls` 0.23 在同时编译多个提供者时无法自动选择；
/// - 所有 TLS 断言共享同一次初始化，`Once` 保证只注册一次。
///
/// # 契约（What）
/// - 可被安全地多次调用；若其他代码已安装提供者则沿用已安装的那个。
pub fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// 测试用自签名 PKI：服务端配置与只信任该证书的客户端配置。
#[derive(Clone, Debug)]
pub struct SelfSigned {
    pub server: Arc<ServerConfig>,
    pub client: Arc<ClientConfig>,
}

impl SelfSigned {
    /// `common_name` 同时写入 CN 与 SAN，客户端以该名称校验 SNI。
    pub fn generate(common_name: &str) -> Result<Self> {
        ensure_crypto_provider();

        let mut params =
            CertificateParams::new(vec![common_name.to_string()]).context("certificate params")?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;

        let key_pair = KeyPair::generate().context("generate key pair")?;
        let certificate = params.self_signed(&key_pair).context("self-sign certificate")?;
        let cert_der = CertificateDer::from(certificate.der().to_vec());
        let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
            .map_err(|err| anyhow::anyhow!("parse private key: {err}"))?;

        let server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], key_der)
            .context("build server config")?;

        let mut roots = RootCertStore::empty();
        roots.add(cert_der).context("add trust anchor")?;
        let client = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            server: Arc::new(server),
            client: Arc::new(client),
        })
    }
}

/// 在被测传输上完成 TLS 握手后，双向收发与收尾语义与明文一致。
pub async fn tls_is_transparent(transport: &TransportUnderTest) -> Result<()> {
    let pki = SelfSigned::generate("localhost")?;
    let (plain_client, plain_server) = transport.connected_pair().await?;
    let client_id = plain_client.id();
    let cancel = CancellationToken::new();
    let tls_client = TlsClient::new(pki.client.clone());
    let tls_server = TlsServer::new(pki.server.clone());

    let (client, server) = tokio::time::timeout(BOUND, async {
        tokio::join!(
            tls_client.connect(plain_client, "localhost", &cancel),
            tls_server.accept(plain_server, &cancel),
        )
    })
    .await
    .context("tls handshake within bound")?;
    let client = client.context("tls client handshake")?;
    let server = server.context("tls server handshake")?;

    ensure!(client.id() == client_id, "tls connection changed identity");
    ensure!(client.properties().contains::<TlsInfo>(), "client lacks TlsInfo");
    ensure!(server.properties().contains::<TlsInfo>(), "server lacks TlsInfo");

    let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 239) as u8).collect();
    for chunk in payload.chunks(5_000) {
        client
            .transport()
            .output()
            .write(Bytes::copy_from_slice(chunk))
            .await
            .context("tls client write")?;
    }
    ensure!(read_exact(&server, payload.len()).await? == payload, "tls payload corrupted");

    server
        .transport()
        .output()
        .write(Bytes::from_static(b"secure"))
        .await
        .context("tls server write")?;
    ensure!(read_exact(&client, 6).await? == b"secure", "tls reply corrupted");

    client.dispose().await;
    let eof = tokio::time::timeout(BOUND, server.transport().input().read())
        .await
        .context("peer observes tls close")?;
    match eof {
        Ok(None) => {}
        Err(err) if err.is_graceful() => {}
        other => anyhow::bail!("peer expected EOF after close_notify, got {other:?}"),
    }
    server.dispose().await;
    Ok(())
}
