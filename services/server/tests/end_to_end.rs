//! End-to-end scenarios driving the collector over real sockets: a TCP
//! ingest listener, a UDP ingest listener, and the observer WebSocket
//! endpoint, all talking to one in-process `Backend`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use syslog_proto::{Filter, SetFilter};
use syslog_server::backend::Backend;
use syslog_server::ingest::{tcp, udp};
use syslog_test_utils::{send_tcp_framed, send_tcp_framed_many, send_udp, ObserverTestClient};

async fn spawn_tcp_listener(backend: Arc<Backend>) -> (SocketAddr, CancellationToken) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        tcp::run(addr, backend, task_cancel).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, cancel)
}

async fn spawn_udp_listener(backend: Arc<Backend>) -> (SocketAddr, CancellationToken) {
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    drop(socket);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        udp::run(addr, backend, task_cancel).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, cancel)
}

async fn spawn_observer_server(backend: Arc<Backend>) -> (SocketAddr, CancellationToken) {
    let router = syslog_server::ui::router(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(task_cancel.cancelled_owned())
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, cancel)
}

#[tokio::test]
async fn tcp_ingest_of_one_message_is_queryable() {
    let dir = tempdir().unwrap();
    let handle = Backend::create(&dir.path().join("log.db"), 1_000_000, 10_000_000, false, false)
        .await
        .unwrap();
    let mut changes = handle.backend.subscribe();
    let (addr, cancel) = spawn_tcp_listener(handle.backend.clone()).await;

    send_tcp_framed(&addr.to_string(), "<13>1 - - - - - - BOMhello")
        .await
        .unwrap();
    changes.recv().await.unwrap();

    let entries = handle.backend.query(Filter::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].msg.msg, Some("hello".to_owned()));
    assert_eq!(entries[0].msg.facility.code(), 1);
    assert_eq!(entries[0].msg.severity.code(), 5);

    cancel.cancel();
    handle.shutdown().await;
}

#[tokio::test]
async fn batching_of_eleven_messages_yields_two_notifications() {
    let dir = tempdir().unwrap();
    let handle = Backend::create(&dir.path().join("log.db"), 1_000_000, 10_000_000, false, false)
        .await
        .unwrap();
    let mut changes = handle.backend.subscribe();
    let (addr, cancel) = spawn_tcp_listener(handle.backend.clone()).await;

    let bodies: Vec<String> = (0..11)
        .map(|i| format!("<13>1 - - - - - - BOMn-{i}"))
        .collect();
    let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
    send_tcp_framed_many(&addr.to_string(), &refs).await.unwrap();

    let first = changes.recv().await.unwrap();
    let second = changes.recv().await.unwrap();
    assert_eq!(first.len(), 10);
    assert_eq!(second.len(), 1);

    cancel.cancel();
    handle.shutdown().await;
}

#[tokio::test]
async fn retention_trims_and_archives_in_one_run() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("log.db");
    let handle = Backend::create(&db_path, 2, 3, true, false).await.unwrap();
    let mut changes = handle.backend.subscribe();
    let (addr, cancel) = spawn_tcp_listener(handle.backend.clone()).await;

    let bodies: Vec<String> = (0..4)
        .map(|i| format!("<13>1 - - - - - - BOMn-{i}"))
        .collect();
    let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
    send_tcp_framed_many(&addr.to_string(), &refs).await.unwrap();

    changes.recv().await.unwrap(); // 4 inserted
    let cleanup = changes.recv().await.unwrap(); // retention ran
    assert!(cleanup.is_empty());

    let bounds = handle.backend.bounds().await;
    assert_eq!(bounds.first_id, Some(3));
    assert_eq!(bounds.last_id, Some(4));

    let entries = handle.backend.query(Filter::default()).await.unwrap();
    assert_eq!(entries.len(), 2);

    let archive_path = db_path.with_file_name(format!(
        "{}.1",
        db_path.file_name().unwrap().to_string_lossy()
    ));
    assert!(archive_path.exists(), "expected {archive_path:?} to exist");

    let archive_handle = syslog_server::db::Db::open(&archive_path, false).unwrap();
    let archived = archive_handle.db.query(Filter::default()).await.unwrap();
    let mut ids: Vec<i64> = archived.iter().map(|e| e.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
    archive_handle.join();

    cancel.cancel();
    handle.shutdown().await;
}

#[tokio::test]
async fn observer_filter_change_narrows_then_widens_results() {
    let dir = tempdir().unwrap();
    let handle = Backend::create(&dir.path().join("log.db"), 1_000_000, 10_000_000, false, false)
        .await
        .unwrap();
    let (tcp_addr, tcp_cancel) = spawn_tcp_listener(handle.backend.clone()).await;
    let (ui_addr, ui_cancel) = spawn_observer_server(handle.backend.clone()).await;

    let bodies: Vec<String> = (0..10)
        .map(|i| format!("<13>1 - - - - - - BOMn-{i}"))
        .collect();
    let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
    send_tcp_framed_many(&tcp_addr.to_string(), &refs).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut client = ObserverTestClient::connect(&format!("ws://{ui_addr}/syslog/ws"))
        .await
        .unwrap();
    let initial = client.recv_state().await.unwrap();
    assert_eq!(initial.entries.len(), 10);

    client
        .set_filter(&SetFilter {
            filter: Filter {
                msg: Some("n-3".to_owned()),
                ..Default::default()
            },
        })
        .await
        .unwrap();
    let narrowed = client.recv_state().await.unwrap();
    assert_eq!(narrowed.entries.len(), 1);
    assert_eq!(narrowed.entries[0].msg.msg, Some("n-3".to_owned()));

    client.set_filter(&SetFilter { filter: Filter::default() }).await.unwrap();
    let widened = client.recv_state().await.unwrap();
    assert_eq!(widened.entries.len(), 10);

    client.close().await.unwrap();
    tcp_cancel.cancel();
    ui_cancel.cancel();
    handle.shutdown().await;
}

#[tokio::test]
async fn udp_parse_failure_does_not_close_the_listener() {
    let dir = tempdir().unwrap();
    let handle = Backend::create(&dir.path().join("log.db"), 1_000_000, 10_000_000, false, false)
        .await
        .unwrap();
    let mut changes = handle.backend.subscribe();
    let (addr, cancel) = spawn_udp_listener(handle.backend.clone()).await;

    send_udp(&addr.to_string(), "not a syslog message").await.unwrap();
    send_udp(&addr.to_string(), "<13>1 - - - - - - BOMfirst").await.unwrap();
    changes.recv().await.unwrap();
    send_udp(&addr.to_string(), "<13>1 - - - - - - BOMsecond").await.unwrap();
    changes.recv().await.unwrap();

    let entries = handle.backend.query(Filter::default()).await.unwrap();
    assert_eq!(entries.len(), 2);

    cancel.cancel();
    handle.shutdown().await;
}
