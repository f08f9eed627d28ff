//! RFC 5424 syslog collector: TCP/UDP/TLS ingest, sqlite-backed storage with
//! watermark retention, and a WebSocket endpoint for live observers.

pub mod backend;
pub mod config;
pub mod db;
pub mod ingest;
pub mod supervisor;
pub mod ui;

pub use config::Config;
