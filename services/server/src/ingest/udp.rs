//! UDP syslog listener: one complete RFC 5424 message per datagram, no
//! length prefix. A malformed datagram is logged and dropped; it never
//! closes the listener (§4.4, §8 scenario 6).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use syslog_proto::decode_msg_wire;

use crate::backend::Backend;

const MAX_DATAGRAM_SIZE: usize = 65_527;

pub async fn run(
    addr: SocketAddr,
    backend: Arc<Backend>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let socket = UdpSocket::bind(addr).await?;
    info!(%addr, "listening for udp syslog messages");

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%addr, "udp listener cancelled");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "udp recv error");
                        continue;
                    }
                };
                if let Err(e) = handle_datagram(&backend, &buf[..len]).await {
                    error!(%peer, error = %e, "dropping malformed syslog datagram");
                }
            }
        }
    }
}

async fn handle_datagram(backend: &Arc<Backend>, payload: &[u8]) -> anyhow::Result<()> {
    let text = std::str::from_utf8(payload)?;
    let msg = decode_msg_wire(text)?;
    debug!("received new syslog message");
    backend.register(chrono::Utc::now(), msg).await?;
    Ok(())
}
