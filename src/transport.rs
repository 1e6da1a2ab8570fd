//! Optional TLS for both the listen and send sides (§6). Grounded in the
//! `tokio-rustls` + `rustls-pemfile` pairing the wider retrieval pack uses
//! for the same shape of "maybe wrap a `TcpStream`" problem.
//!
//! Client-side verification is disabled by default, matching the behavior
//! of existing Dukto/NitroShare peers (most of which present self-signed
//! certificates and expect to be trusted on first use rather than verified
//! against a CA).

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, ServerConfig, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::TransferError;

/// Any stream the engines and the sender can read from and write to,
/// regardless of whether TLS is in play.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let bytes = std::fs::read(path)?;
    rustls_pemfile::certs(&mut bytes.as_slice()).collect()
}

fn load_private_key(path: &Path) -> io::Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut bytes.as_slice())?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found in key file"))
}

/// Builds a `TlsAcceptor` from a PEM certificate chain and private key.
pub fn server_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TransferError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransferError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

/// Builds a `TlsConnector` that accepts any certificate the peer presents.
pub fn client_connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerification))
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

pub async fn connect_tls(connector: &TlsConnector, stream: TcpStream, server_name: &str) -> Result<BoxedStream, TransferError> {
    let name = ServerName::try_from(server_name.to_string()).map_err(|e| TransferError::Tls(e.to_string()))?;
    let tls = connector
        .connect(name, stream)
        .await
        .map_err(|e| TransferError::Tls(e.to_string()))?;
    Ok(Box::new(tls))
}

pub async fn accept_tls(acceptor: &TlsAcceptor, stream: TcpStream) -> Result<BoxedStream, TransferError> {
    let tls = acceptor.accept(stream).await.map_err(|e| TransferError::Tls(e.to_string()))?;
    Ok(Box::new(tls))
}
