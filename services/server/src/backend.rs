//! Batches inbound messages into the database, tracks the log's bounds, and
//! runs watermark retention with optional archive rotation.
//!
//! Grounded on the original `backend.py`'s `_loop`/`_get_msgs`/`_process_msgs`/
//! `_db_cleanup`/`_archive_db` control flow, generalized to `tokio`'s task +
//! channel primitives the way the teacher's `session.rs` batch/ack loop does.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

use syslog_proto::{Entry, Filter, Msg};

use crate::db::{Db, DbError, DbHandle};

pub const REGISTER_QUEUE_SIZE: usize = 50;
pub const REGISTER_QUEUE_THRESHOLD: usize = 10;
pub const REGISTER_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database: {0}")]
    Db(#[from] DbError),
    #[error("backend ingest queue is closed")]
    QueueClosed,
}

/// Current `first_id`/`last_id` pair. `None` means the log is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bounds {
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
}

pub struct Backend {
    db: Db,
    bounds: Arc<RwLock<Bounds>>,
    register_tx: mpsc::Sender<(DateTime<Utc>, Msg)>,
    change_tx: broadcast::Sender<Vec<Entry>>,
}

pub struct BackendHandle {
    pub backend: Arc<Backend>,
    db_handle: Option<DbHandle>,
    loop_handle: Option<tokio::task::JoinHandle<()>>,
}

struct RetentionConfig {
    low_size: i64,
    high_size: i64,
    enable_archive: bool,
    disable_journal: bool,
}

impl Backend {
    pub async fn create(
        path: &Path,
        low_size: i64,
        high_size: i64,
        enable_archive: bool,
        disable_journal: bool,
    ) -> Result<BackendHandle, BackendError> {
        let db_handle = Db::open(path, disable_journal)?;
        let db = db_handle.db.clone();
        let first_id = db.get_first_id().await?;
        let last_id = db.get_last_id().await?;

        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE_SIZE);
        let (change_tx, _) = broadcast::channel(256);

        let backend = Arc::new(Backend {
            db,
            bounds: Arc::new(RwLock::new(Bounds { first_id, last_id })),
            register_tx,
            change_tx,
        });

        let loop_backend = backend.clone();
        let config = RetentionConfig {
            low_size,
            high_size,
            enable_archive,
            disable_journal,
        };
        let path = path.to_path_buf();
        let loop_handle = tokio::spawn(async move {
            run_batch_loop(loop_backend, register_rx, path, config).await;
        });

        Ok(BackendHandle {
            backend,
            db_handle: Some(db_handle),
            loop_handle: Some(loop_handle),
        })
    }

    /// Enqueues a message for insertion. Blocks if the ingest queue is full.
    pub async fn register(
        &self,
        timestamp: DateTime<Utc>,
        msg: Msg,
    ) -> Result<(), BackendError> {
        self.register_tx
            .send((timestamp, msg))
            .await
            .map_err(|_| BackendError::QueueClosed)
    }

    pub async fn query(&self, filter: Filter) -> Result<Vec<Entry>, BackendError> {
        Ok(self.db.query(filter).await?)
    }

    /// Subscribes to change notifications. A notification carries the newly
    /// inserted entries (newest first), or an empty list when only the
    /// bounds changed (e.g. after retention cleanup).
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Entry>> {
        self.change_tx.subscribe()
    }

    pub async fn bounds(&self) -> Bounds {
        *self.bounds.read().await
    }
}

impl BackendHandle {
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(db_handle) = self.db_handle.take() {
            db_handle.join();
        }
    }
}

async fn run_batch_loop(
    backend: Arc<Backend>,
    mut register_rx: mpsc::Receiver<(DateTime<Utc>, Msg)>,
    db_path: PathBuf,
    config: RetentionConfig,
) {
    loop {
        let Some(batch) = collect_batch(&mut register_rx).await else {
            debug!("backend ingest channel closed, batch loop exiting");
            return;
        };
        if let Err(e) = process_batch(&backend, &db_path, &config, batch).await {
            warn!(error = %e, "backend loop error, closing");
            return;
        }
    }
}

/// Implements the "first wait blocking, subsequent waits with a recomputed
/// deadline" collection strategy: block for the first message, then drain
/// whatever's ready, then keep waiting (with a shrinking timeout) until the
/// budget elapses or the threshold is hit.
async fn collect_batch(
    rx: &mut mpsc::Receiver<(DateTime<Utc>, Msg)>,
) -> Option<Vec<(DateTime<Utc>, Msg)>> {
    let first = rx.recv().await?;
    let mut batch = vec![first];
    drain_ready(rx, &mut batch);

    let deadline = Instant::now() + REGISTER_DELAY;
    loop {
        if batch.len() >= REGISTER_QUEUE_THRESHOLD {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(msg)) => batch.push(msg),
            Ok(None) => break,
            Err(_) => break,
        }
    }
    drain_ready(rx, &mut batch);
    Some(batch)
}

fn drain_ready(rx: &mut mpsc::Receiver<(DateTime<Utc>, Msg)>, batch: &mut Vec<(DateTime<Utc>, Msg)>) {
    while let Ok(msg) = rx.try_recv() {
        batch.push(msg);
    }
}

async fn process_batch(
    backend: &Arc<Backend>,
    db_path: &Path,
    config: &RetentionConfig,
    batch: Vec<(DateTime<Utc>, Msg)>,
) -> Result<(), BackendError> {
    if batch.is_empty() {
        return Ok(());
    }
    debug!(count = batch.len(), "registering new messages");
    let entries = backend.db.add_msgs(batch).await?;
    if entries.is_empty() {
        return Ok(());
    }

    let mut newest_first = entries;
    newest_first.reverse();

    {
        let mut bounds = backend.bounds.write().await;
        bounds.last_id = Some(newest_first[0].id);
        if bounds.first_id.is_none() {
            bounds.first_id = Some(newest_first[newest_first.len() - 1].id);
        }
    }
    let bounds_now = backend.bounds().await;
    debug!(first_id = ?bounds_now.first_id, last_id = ?bounds_now.last_id, "backend state changed");
    let _ = backend.change_tx.send(newest_first);

    if config.high_size <= 0 {
        return Ok(());
    }
    let (first_id, last_id) = match (bounds_now.first_id, bounds_now.last_id) {
        (Some(f), Some(l)) => (f, l),
        _ => return Ok(()),
    };
    if last_id - first_id + 1 <= config.high_size {
        return Ok(());
    }

    debug!("database cleanup starting");
    if let Err(e) = run_cleanup(backend, db_path, config, first_id, last_id).await {
        warn!(error = %e, "retention cleanup failed, skipping this cycle");
    }
    Ok(())
}

async fn run_cleanup(
    backend: &Arc<Backend>,
    db_path: &Path,
    config: &RetentionConfig,
    first_id: i64,
    last_id: i64,
) -> Result<(), BackendError> {
    let new_first = last_id - config.low_size + 1;
    let new_first = if new_first > last_id {
        None
    } else {
        Some(new_first)
    };
    if let Some(nf) = new_first {
        if nf <= first_id {
            return Ok(());
        }
    }

    if config.enable_archive {
        debug!("archiving database entries");
        archive_entries(backend, db_path, config.disable_journal, new_first).await?;
    }

    backend.db.delete(new_first).await?;

    {
        let mut bounds = backend.bounds.write().await;
        bounds.first_id = new_first;
        if bounds.first_id.is_none() {
            bounds.last_id = None;
        }
    }
    let bounds_now = backend.bounds().await;
    debug!(first_id = ?bounds_now.first_id, last_id = ?bounds_now.last_id, "backend state changed");
    let _ = backend.change_tx.send(Vec::new());
    Ok(())
}

async fn archive_entries(
    backend: &Arc<Backend>,
    db_path: &Path,
    disable_journal: bool,
    new_first: Option<i64>,
) -> Result<(), BackendError> {
    let archive_path = next_archive_path(db_path);
    let archive_handle = Db::open(&archive_path, disable_journal)?;
    let filter = Filter {
        last_id: new_first.map(|id| id - 1),
        ..Default::default()
    };
    let entries = backend.db.query(filter).await?;
    archive_handle.db.add_entries(entries).await?;
    archive_handle.join();
    Ok(())
}

/// Scans for sibling files `db_path.<N>` and returns a path with the next
/// unused `N`. Tolerates any non-matching sibling (a file that doesn't
/// parse as `db_path.<integer>` is simply ignored, not an error).
fn next_archive_path(db_path: &Path) -> PathBuf {
    let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!("{file_name}.");

    let mut last_index: i64 = 0;
    if let Ok(read_dir) = std::fs::read_dir(dir) {
        for entry in read_dir.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(suffix) = name.strip_prefix(&prefix)
                && let Ok(index) = suffix.parse::<i64>()
                && index > last_index
            {
                last_index = index;
            }
        }
    }

    let mut candidate = last_index + 1;
    loop {
        let path = dir.join(format!("{file_name}.{candidate}"));
        if !path.exists() {
            return path;
        }
        candidate += 1;
    }
}
