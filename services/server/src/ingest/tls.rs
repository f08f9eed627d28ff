//! TLS syslog listener: the same octet-counted framing as `tcp.rs`, over a
//! rustls-terminated connection. Requires a PEM file with both certificate
//! chain and private key; failing to load it is a fatal startup error.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use syslog_proto::decode_msg_wire;

use crate::backend::Backend;
use crate::ingest::framing::OctetCountingDecoder;
use crate::ingest::tcp::enable_keepalive;

pub fn load_server_config(pem_path: &Path) -> anyhow::Result<rustls::ServerConfig> {
    let pem_bytes = std::fs::read(pem_path)?;
    let mut certs_reader = std::io::Cursor::new(&pem_bytes);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut certs_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("failed to parse certificate chain in {pem_path:?}: {e}"))?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {pem_path:?}");
    }

    let mut key_reader = std::io::Cursor::new(&pem_bytes);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| anyhow::anyhow!("failed to parse private key in {pem_path:?}: {e}"))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {pem_path:?}"))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

pub async fn run(
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    backend: Arc<Backend>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening for tls syslog clients");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%addr, "tls listener cancelled");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "tls accept error");
                        continue;
                    }
                };
                enable_keepalive(&stream);
                let acceptor = acceptor.clone();
                let backend = backend.clone();
                let cancel = cancel.child_token();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(%peer, error = %e, "tls handshake failed");
                            return;
                        }
                    };
                    run_client(tls_stream, peer, backend, cancel).await;
                });
            }
        }
    }
}

async fn run_client(
    stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    peer: SocketAddr,
    backend: Arc<Backend>,
    cancel: CancellationToken,
) {
    let mut frames = FramedRead::new(stream, OctetCountingDecoder::new());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => {
                match frame {
                    None => break,
                    Some(Err(e)) => {
                        error!(%peer, error = %e, "tls client error");
                        break;
                    }
                    Some(Ok(payload)) => {
                        if let Err(e) = handle_payload(&backend, &payload).await {
                            error!(%peer, error = %e, "malformed syslog message, closing connection");
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!(%peer, "tls client connection closed");
}

async fn handle_payload(backend: &Arc<Backend>, payload: &[u8]) -> anyhow::Result<()> {
    let text = std::str::from_utf8(payload)?;
    let msg = decode_msg_wire(text)?;
    debug!("received new syslog message");
    backend.register(chrono::Utc::now(), msg).await?;
    Ok(())
}
