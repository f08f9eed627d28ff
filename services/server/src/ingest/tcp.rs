//! Plain TCP syslog listener, octet-counted framing (§4.4).

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use syslog_proto::decode_msg_wire;

use crate::backend::Backend;
use crate::ingest::framing::OctetCountingDecoder;

pub async fn run(
    addr: SocketAddr,
    backend: Arc<Backend>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening for tcp syslog clients");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%addr, "tcp listener cancelled");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "tcp accept error");
                        continue;
                    }
                };
                enable_keepalive(&stream);
                let backend = backend.clone();
                let cancel = cancel.child_token();
                tokio::spawn(async move {
                    run_client(stream, peer, backend, cancel).await;
                });
            }
        }
    }
}

pub fn enable_keepalive(stream: &TcpStream) {
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(std::time::Duration::from_secs(60));
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "failed to enable tcp keepalive");
    }
}

async fn run_client(
    stream: TcpStream,
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
                        error!(%peer, error = %e, "tcp client error");
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
    debug!(%peer, "tcp client connection closed");
}

async fn handle_payload(backend: &Arc<Backend>, payload: &[u8]) -> anyhow::Result<()> {
    let text = std::str::from_utf8(payload)?;
    let msg = decode_msg_wire(text)?;
    debug!("received new syslog message");
    backend.register(chrono::Utc::now(), msg).await?;
    Ok(())
}
