use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use common::{MAX_MESSAGE_SIZE, NfsRequest, NfsResponse, decode_message, encode_message};
use log::{debug, info, warn};
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint};
use rustls::DigitallySignedStruct;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore, SignatureScheme};
use tokio::sync::Mutex;

use crate::error::TransportError;

/// One request, one reply. Implementations do not retry; that is the job of
/// [`RetryingCaller`](crate::retry::RetryingCaller).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, req: &NfsRequest) -> Result<NfsResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn call(&self, req: &NfsRequest) -> Result<NfsResponse, TransportError> {
        (**self).call(req).await
    }
}

/// The server presents a self-signed certificate, so it is not checked.
#[derive(Debug)]
struct SkipServerVerification;

impl ServerCertVerifier for SkipServerVerification {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

/// Installs the ring crypto provider for rustls; a second call is a no-op.
pub fn init_crypto() {
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );
}

/// QUIC transport: one cached connection to the server, one bidirectional
/// stream per call. A failed call drops the connection so the next attempt
/// dials again.
pub struct QuicTransport {
    endpoint: Endpoint,
    server_addr: SocketAddr,
    conn: Mutex<Option<Connection>>,
}

impl QuicTransport {
    pub fn new(server_addr: SocketAddr) -> Result<Self, TransportError> {
        init_crypto();
        let mut tls = RustlsClientConfig::builder()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        tls.dangerous()
            .set_certificate_verifier(Arc::new(SkipServerVerification));

        let quic_crypto =
            QuicClientConfig::try_from(tls).map_err(|e| TransportError::Setup(e.to_string()))?;
        let client_cfg = QuinnClientConfig::new(Arc::new(quic_crypto));

        let bind: SocketAddr = if server_addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };
        let mut endpoint =
            Endpoint::client(bind).map_err(|e| TransportError::Setup(e.to_string()))?;
        endpoint.set_default_client_config(client_cfg);

        Ok(Self {
            endpoint,
            server_addr,
            conn: Mutex::new(None),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    async fn connection(&self) -> Result<Connection, TransportError> {
        let mut cached = self.conn.lock().await;
        if let Some(conn) = cached.as_ref()
            && conn.close_reason().is_none()
        {
            return Ok(conn.clone());
        }

        let unreachable = |reason: String| TransportError::Unreachable {
            addr: self.server_addr.to_string(),
            reason,
        };
        let conn = self
            .endpoint
            .connect(self.server_addr, "localhost")
            .map_err(|e| unreachable(e.to_string()))?
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        info!("[client] connected to rknfsd at {}", self.server_addr);
        *cached = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close(0u32.into(), b"reset after failure");
        }
    }
}

fn stream_err(e: impl std::fmt::Display) -> TransportError {
    TransportError::Stream(e.to_string())
}

async fn exchange(conn: &Connection, req: &NfsRequest) -> Result<NfsResponse, TransportError> {
    let data = encode_message(req).map_err(|e| TransportError::Encode(e.to_string()))?;
    let (mut send, mut recv) = conn.open_bi().await.map_err(stream_err)?;
    send.write_all(&data).await.map_err(stream_err)?;
    send.finish().map_err(stream_err)?;

    let buf = recv
        .read_to_end(MAX_MESSAGE_SIZE)
        .await
        .map_err(stream_err)?;
    debug!(
        "[client] {} sent {} bytes, reply {} bytes",
        req.procedure(),
        data.len(),
        buf.len()
    );
    decode_message(&buf).map_err(|e| TransportError::Codec(e.to_string()))
}

#[async_trait]
impl Transport for QuicTransport {
    async fn call(&self, req: &NfsRequest) -> Result<NfsResponse, TransportError> {
        let conn = self.connection().await?;
        match exchange(&conn, req).await {
            Ok(resp) => Ok(resp),
            Err(e @ TransportError::Encode(_)) => Err(e),
            Err(e) => {
                warn!("[client] {} failed on the wire: {e}", req.procedure());
                self.reset().await;
                Err(e)
            }
        }
    }
}
