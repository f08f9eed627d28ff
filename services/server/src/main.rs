use clap::Parser;
use tracing_subscriber::EnvFilter;

use syslog_server::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = syslog_server::supervisor::run(config).await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}
