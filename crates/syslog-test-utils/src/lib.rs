//! Shared test utilities: a raw syslog line sender and an observer
//! WebSocket client, for integration tests of the collector service.

pub mod observer_client;
pub mod syslog_sender;

pub use observer_client::ObserverTestClient;
pub use syslog_sender::{send_tcp_framed, send_tcp_framed_many, send_udp};
