use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use common::{MAX_MESSAGE_SIZE, NfsRequest, NfsResponse, NfsStatus, decode_message, encode_message};
use log::{debug, info, warn};
use quinn::{Connection, ConnectionError, Endpoint, RecvStream, SendStream, ServerConfig, VarInt};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use tokio_util::sync::CancellationToken;

use crate::handlers::NfsService;

/// QUIC front end: every bidirectional stream carries one request and its reply.
pub struct NfsServer {
    endpoint: Endpoint,
    service: Arc<NfsService>,
}

impl NfsServer {
    pub fn bind(addr: SocketAddr, service: Arc<NfsService>) -> Result<Self> {
        let endpoint = make_server_endpoint(addr)?;
        Ok(Self { endpoint, service })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Accepts connections until `shutdown` fires; a task is spawned per
    /// connection and per stream.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let incoming = tokio::select! {
                _ = shutdown.cancelled() => break,
                incoming = self.endpoint.accept() => incoming,
            };
            let Some(incoming) = incoming else {
                break;
            };
            let service = self.service.clone();
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        info!("[server] connection accepted: addr={}", conn.remote_address());
                        if let Err(e) = handle_connection(conn, service).await {
                            warn!("[server] handle_connection error: {e:?}");
                        }
                    }
                    Err(e) => warn!("[server] failed to establish connection: {e:?}"),
                }
            });
        }

        self.endpoint
            .close(VarInt::from_u32(0), b"server shutting down");
        self.endpoint.wait_idle().await;
        info!("[server] endpoint closed");
        Ok(())
    }
}

async fn handle_connection(conn: Connection, service: Arc<NfsService>) -> Result<()> {
    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_stream(send, recv, service).await {
                        warn!("[server] stream error: {e:?}");
                    }
                });
            }
            Err(ConnectionError::ApplicationClosed(_)) | Err(ConnectionError::LocallyClosed) => {
                info!("[server] connection closed: addr={}", conn.remote_address());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn handle_stream(
    mut send: SendStream,
    mut recv: RecvStream,
    service: Arc<NfsService>,
) -> Result<()> {
    let buf = recv.read_to_end(MAX_MESSAGE_SIZE).await?;
    let response = match decode_message::<NfsRequest>(&buf) {
        Ok(request) => {
            debug!("[server] {} request, {} bytes", request.procedure(), buf.len());
            service.dispatch(request).await
        }
        Err(e) => NfsResponse::Failure(NfsStatus::Invalid(format!("undecodable request: {e}"))),
    };
    let data = match encode_message(&response) {
        Ok(data) => data,
        Err(e) => {
            warn!("[server] reply cannot be encoded: {e}");
            encode_message(&NfsResponse::Failure(NfsStatus::Io(format!(
                "reply cannot be encoded: {e}"
            ))))?
        }
    };
    send.write_all(&data).await?;
    send.finish()?;
    Ok(())
}

fn make_server_endpoint(bind_addr: SocketAddr) -> Result<Endpoint> {
    let server_config = configure_server()?;
    let endpoint = Endpoint::server(server_config, bind_addr)?;
    Ok(endpoint)
}

/// Self-signed certificate for `localhost`; clients do not verify it.
fn configure_server() -> Result<ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let cert_der = CertificateDer::from(cert.serialize_der()?);
    let key = PrivatePkcs8KeyDer::from(cert.serialize_private_key_der());
    let server_config =
        ServerConfig::with_single_cert(vec![cert_der], rustls::pki_types::PrivateKeyDer::Pkcs8(key))?;
    Ok(server_config)
}

/// Installs the ring crypto provider for rustls; a second call is a no-op.
pub fn init_crypto() {
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );
}
