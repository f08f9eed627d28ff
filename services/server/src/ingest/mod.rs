//! Parses `syslog_addrs` CLI entries and starts the corresponding listener
//! for each (§4.4, §6 CLI surface).

pub mod framing;
pub mod tcp;
pub mod tls;
pub mod udp;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backend::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
    Udp,
}

#[derive(Debug, Clone, Copy)]
pub struct ListenAddr {
    pub scheme: Scheme,
    pub addr: SocketAddr,
}

pub fn parse_listen_addr(raw: &str) -> anyhow::Result<ListenAddr> {
    let url = Url::parse(raw)?;
    let scheme = match url.scheme() {
        "tcp" => Scheme::Tcp,
        "tls" => Scheme::Tls,
        "udp" => Scheme::Udp,
        other => anyhow::bail!("unsupported syslog address scheme: {other}"),
    };
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("syslog address is missing a host: {raw}"))?;
    let port = url
        .port()
        .ok_or_else(|| anyhow::anyhow!("syslog address is missing a port: {raw}"))?;
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    Ok(ListenAddr { scheme, addr })
}

/// Starts one listener task per parsed address. A `tls://` address requires
/// `pem_path`; its absence is a fatal startup error, matching §6.
pub fn spawn_listeners(
    addrs: &[ListenAddr],
    pem_path: Option<&Path>,
    backend: Arc<Backend>,
    cancel: CancellationToken,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let needs_tls = addrs.iter().any(|a| a.scheme == Scheme::Tls);
    let tls_acceptor = if needs_tls {
        let pem_path = pem_path
            .ok_or_else(|| anyhow::anyhow!("--syslog-pem-path is required for a tls:// address"))?;
        let config = tls::load_server_config(pem_path)?;
        Some(tokio_rustls::TlsAcceptor::from(Arc::new(config)))
    } else {
        None
    };

    let mut handles = Vec::with_capacity(addrs.len());
    for listen in addrs {
        let backend = backend.clone();
        let cancel = cancel.child_token();
        let handle = match listen.scheme {
            Scheme::Tcp => {
                let addr = listen.addr;
                tokio::spawn(async move {
                    if let Err(e) = tcp::run(addr, backend, cancel).await {
                        tracing::error!(%addr, error = %e, "tcp listener exited with error");
                    }
                })
            }
            Scheme::Udp => {
                let addr = listen.addr;
                tokio::spawn(async move {
                    if let Err(e) = udp::run(addr, backend, cancel).await {
                        tracing::error!(%addr, error = %e, "udp listener exited with error");
                    }
                })
            }
            Scheme::Tls => {
                let addr = listen.addr;
                let acceptor = tls_acceptor
                    .clone()
                    .expect("tls acceptor constructed above when any address is tls://");
                tokio::spawn(async move {
                    if let Err(e) = tls::run(addr, acceptor, backend, cancel).await {
                        tracing::error!(%addr, error = %e, "tls listener exited with error");
                    }
                })
            }
        };
        handles.push(handle);
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_supported_scheme() {
        let tcp = parse_listen_addr("tcp://0.0.0.0:6514").unwrap();
        assert_eq!(tcp.scheme, Scheme::Tcp);
        assert_eq!(tcp.addr.port(), 6514);

        let udp = parse_listen_addr("udp://0.0.0.0:6514").unwrap();
        assert_eq!(udp.scheme, Scheme::Udp);

        let tls = parse_listen_addr("tls://0.0.0.0:6515").unwrap();
        assert_eq!(tls.scheme, Scheme::Tls);
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(parse_listen_addr("http://0.0.0.0:80").is_err());
    }

    #[test]
    fn rejects_missing_port() {
        assert!(parse_listen_addr("tcp://0.0.0.0").is_err());
    }
}
