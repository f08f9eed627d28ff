//! CLI surface, grounded on the original `hat-syslog` server's own options
//! (`--syslog-addr`, `--db-path`, `--db-low-size`, ...), reworked for the
//! "CLI-only config, plural listen addresses" variant this system settled
//! on (see the design ledger's open-question decisions).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use url::Url;

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hat")
        .join("syslog.db")
}

#[derive(Debug, Parser)]
#[command(name = "syslog-server", version, about = "RFC 5424 syslog collector")]
pub struct Config {
    /// Log verbosity, passed straight to tracing_subscriber's EnvFilter.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// URL the observer WebSocket/HTTP server binds to.
    #[arg(long, default_value = "http://0.0.0.0:23020")]
    pub ui_addr: String,

    /// Path to the sqlite database file.
    #[arg(long, default_value_os_t = default_db_path())]
    pub db_path: PathBuf,

    /// Below this many rows the database is left untouched.
    #[arg(long, default_value_t = 1_000_000)]
    pub db_low_size: i64,

    /// Once the database crosses this many rows, it's trimmed back down to
    /// `db_low_size`.
    #[arg(long, default_value_t = 10_000_000)]
    pub db_high_size: i64,

    /// Copy trimmed rows into a numbered sibling file instead of discarding them.
    #[arg(long, default_value_t = false)]
    pub db_enable_archive: bool,

    /// Disable sqlite's journal. Faster, but a crash mid-write can corrupt the database.
    #[arg(long, default_value_t = false)]
    pub db_disable_journal: bool,

    /// PEM file containing both certificate chain and private key, required
    /// when any `syslog_addrs` entry uses the `tls://` scheme.
    #[arg(long)]
    pub syslog_pem_path: Option<PathBuf>,

    /// `tcp://`, `tls://`, or `udp://` addresses to listen for syslog clients on.
    #[arg(default_values_t = vec![
        "tcp://0.0.0.0:6514".to_owned(),
        "udp://0.0.0.0:6514".to_owned(),
    ])]
    pub syslog_addrs: Vec<String>,
}

impl Config {
    /// Resolves `ui_addr` (a URL, e.g. `http://0.0.0.0:23020`) to the
    /// `SocketAddr` the observer server actually binds to, the same way
    /// `ingest::parse_listen_addr` strips a `tcp://`/`tls://`/`udp://`
    /// scheme down to host and port.
    pub fn ui_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let url = Url::parse(&self.ui_addr)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("ui-addr is missing a host: {}", self.ui_addr))?;
        let port = url
            .port()
            .ok_or_else(|| anyhow::anyhow!("ui-addr is missing a port: {}", self.ui_addr))?;
        Ok(format!("{host}:{port}").parse()?)
    }
}
