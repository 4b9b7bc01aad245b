//! TLS certificate inspection for https probe targets.
//!
//! Opens a plain handshake against `host[:port]` with a permissive
//! verifier (any chain is accepted; the point is to read the leaf, not to
//! judge it) and extracts the issuer common name and the not-after stamp.

use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::FromDer;
use x509_parser::certificate::X509Certificate;

use super::TLS_HANDSHAKE_TIMEOUT;

/// Issuer and expiry of a peer's leaf certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateInfo {
    pub issuer: String,
    pub not_after: DateTime<Utc>,
}

impl CertificateInfo {
    /// The `"<issuer>|<not_after>"` descriptor carried in `TaskResult.data`,
    /// e.g. `Let's Encrypt|2099-01-01 00:00:00 +0000 UTC`.
    pub fn wire_descriptor(&self) -> String {
        format!(
            "{}|{}",
            self.issuer,
            self.not_after.format("%Y-%m-%d %H:%M:%S %z %Z")
        )
    }
}

/// Signature checks still run; chain and hostname validation do not.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn connector() -> &'static TlsConnector {
    static CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();
    CONNECTOR.get_or_init(|| {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .expect("default TLS protocol versions rejected")
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    })
}

/// Handshake against the url's host and read the leaf certificate.
///
/// The whole operation is bounded by [`TLS_HANDSHAKE_TIMEOUT`]; the timeout
/// message ends in `timed out` so the sentinel treats it as transient.
pub async fn inspect_certificate(url: &reqwest::Url) -> Result<CertificateInfo> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("target url has no host"))?
        .to_string();
    let port = url.port().unwrap_or(443);

    tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, handshake(host, port))
        .await
        .map_err(|_| anyhow!("handshake timed out"))?
}

async fn handshake(host: String, port: u16) -> Result<CertificateInfo> {
    let tcp = TcpStream::connect((host.as_str(), port))
        .await
        .with_context(|| format!("connect {host}:{port}"))?;
    let server_name =
        ServerName::try_from(host.clone()).map_err(|_| anyhow!("invalid server name {host}"))?;
    let stream = connector()
        .connect(server_name, tcp)
        .await
        .context("TLS handshake")?;

    let (_, session) = stream.get_ref();
    let certs = session
        .peer_certificates()
        .ok_or_else(|| anyhow!("peer presented no certificate"))?;
    let leaf = certs
        .first()
        .ok_or_else(|| anyhow!("peer presented an empty certificate chain"))?;

    parse_leaf(leaf.as_ref())
}

fn parse_leaf(der: &[u8]) -> Result<CertificateInfo> {
    let (_, cert) = X509Certificate::from_der(der).context("parse peer certificate")?;
    let issuer = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| anyhow!("certificate not-after out of range"))?;

    Ok(CertificateInfo { issuer, not_after })
}
