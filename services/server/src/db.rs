//! The SQL-backed log store.
//!
//! `rusqlite::Connection` is `!Sync` and holds a non-`'static` borrow on the
//! thread it was opened on in spirit if not in type, so every statement runs
//! on one dedicated OS thread. Callers talk to it through a channel of
//! tagged requests, each carrying a `oneshot` reply -- the single-writer
//! worker pattern, standing in for `aio.create_executor(1)` in the system
//! this is ported from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use syslog_proto::{Entry, Facility, Filter, Msg, SdData, Severity};

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database worker is no longer running")]
    WorkerClosed,
    #[error("structured data is not valid JSON: {0}")]
    InvalidData(#[from] serde_json::Error),
    #[error("stored row has an out-of-range enum value: {0}")]
    CorruptEnum(String),
}

pub type DbResult<T> = Result<T, DbError>;

enum Command {
    GetFirstId(oneshot::Sender<DbResult<Option<i64>>>),
    GetLastId(oneshot::Sender<DbResult<Option<i64>>>),
    AddMsgs(
        Vec<(DateTime<Utc>, Msg)>,
        oneshot::Sender<DbResult<Vec<Entry>>>,
    ),
    AddEntries(Vec<Entry>, oneshot::Sender<DbResult<()>>),
    Query(Filter, oneshot::Sender<DbResult<Vec<Entry>>>),
    Delete(Option<i64>, oneshot::Sender<DbResult<u64>>),
}

/// Handle to the database worker. Cheap to clone; all clones share the
/// same underlying connection and request queue.
#[derive(Clone)]
pub struct Db {
    tx: mpsc::Sender<Command>,
}

pub struct DbHandle {
    pub db: Db,
    worker: Option<JoinHandle<()>>,
}

impl DbHandle {
    /// Blocks the calling thread until the worker thread exits. The worker
    /// exits once every `Db` clone has been dropped and the request queue
    /// drains.
    pub fn join(mut self) {
        drop(self.db.tx.clone());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Db {
    pub fn open(path: &Path, disable_journal: bool) -> DbResult<DbHandle> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Sqlite(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(e.to_string()),
                ))
            })?;
        }
        let uri = format!("file:{}?nolock=1", path.display());
        let conn = Connection::open_with_flags(
            uri,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::spawn_worker(conn, disable_journal)
    }

    pub fn open_in_memory() -> DbResult<DbHandle> {
        let conn = Connection::open_in_memory()?;
        Self::spawn_worker(conn, false)
    }

    fn spawn_worker(conn: Connection, disable_journal: bool) -> DbResult<DbHandle> {
        apply_schema(&conn, disable_journal)?;
        let (tx, mut rx) = mpsc::channel::<Command>(64);
        let worker = std::thread::Builder::new()
            .name("syslog-db".to_owned())
            .spawn(move || {
                while let Some(cmd) = rx.blocking_recv() {
                    dispatch(&conn, cmd);
                }
            })
            .map_err(|e| {
                DbError::Sqlite(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(e.to_string()),
                ))
            })?;
        Ok(DbHandle {
            db: Db { tx },
            worker: Some(worker),
        })
    }

    pub async fn get_first_id(&self) -> DbResult<Option<i64>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetFirstId(tx)).await?;
        rx.await.map_err(|_| DbError::WorkerClosed)?
    }

    pub async fn get_last_id(&self) -> DbResult<Option<i64>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetLastId(tx)).await?;
        rx.await.map_err(|_| DbError::WorkerClosed)?
    }

    pub async fn add_msgs(&self, msgs: Vec<(DateTime<Utc>, Msg)>) -> DbResult<Vec<Entry>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::AddMsgs(msgs, tx)).await?;
        rx.await.map_err(|_| DbError::WorkerClosed)?
    }

    pub async fn add_entries(&self, entries: Vec<Entry>) -> DbResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::AddEntries(entries, tx)).await?;
        rx.await.map_err(|_| DbError::WorkerClosed)?
    }

    pub async fn query(&self, filter: Filter) -> DbResult<Vec<Entry>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Query(filter, tx)).await?;
        rx.await.map_err(|_| DbError::WorkerClosed)?
    }

    /// Deletes all rows with `rowid < first_id`; `None` deletes everything.
    /// Returns the number of deleted rows.
    pub async fn delete(&self, first_id: Option<i64>) -> DbResult<u64> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Delete(first_id, tx)).await?;
        rx.await.map_err(|_| DbError::WorkerClosed)?
    }

    async fn send(&self, cmd: Command) -> DbResult<()> {
        self.tx.send(cmd).await.map_err(|_| DbError::WorkerClosed)
    }
}

fn apply_schema(conn: &Connection, disable_journal: bool) -> DbResult<()> {
    if disable_journal {
        conn.execute_batch("PRAGMA journal_mode = OFF;")?;
    }
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

fn dispatch(conn: &Connection, cmd: Command) {
    match cmd {
        Command::GetFirstId(reply) => {
            let _ = reply.send(first_id(conn));
        }
        Command::GetLastId(reply) => {
            let _ = reply.send(last_id(conn));
        }
        Command::AddMsgs(msgs, reply) => {
            let _ = reply.send(add_msgs(conn, msgs));
        }
        Command::AddEntries(entries, reply) => {
            let _ = reply.send(add_entries(conn, entries));
        }
        Command::Query(filter, reply) => {
            let _ = reply.send(query(conn, &filter));
        }
        Command::Delete(first_id, reply) => {
            let _ = reply.send(delete(conn, first_id));
        }
    }
}

fn first_id(conn: &Connection) -> DbResult<Option<i64>> {
    Ok(conn.query_row("SELECT MIN(rowid) FROM log", [], |r| r.get(0))?)
}

fn last_id(conn: &Connection) -> DbResult<Option<i64>> {
    Ok(conn.query_row("SELECT MAX(rowid) FROM log", [], |r| r.get(0))?)
}

fn add_msgs(conn: &Connection, msgs: Vec<(DateTime<Utc>, Msg)>) -> DbResult<Vec<Entry>> {
    if msgs.is_empty() {
        return Ok(Vec::new());
    }
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO log (entry_timestamp, facility, severity, version, \
             msg_timestamp, hostname, app_name, procid, msgid, data, msg) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for (entry_ts, msg) in &msgs {
            stmt.execute(rusqlite::params![
                ts_to_real(*entry_ts),
                msg.facility.code(),
                msg.severity.code(),
                msg.version,
                msg.timestamp.map(ts_to_real),
                msg.hostname,
                msg.app_name,
                msg.procid,
                msg.msgid,
                encode_data(msg.data.as_ref())?,
                msg.msg,
            ])?;
        }
    }
    let last = tx.last_insert_rowid();
    tx.commit()?;
    let count = msgs.len() as i64;
    let first = last - count + 1;
    let entries = (first..=last)
        .zip(msgs)
        .map(|(id, (entry_ts, msg))| Entry {
            id,
            timestamp: entry_ts,
            msg,
        })
        .collect();
    Ok(entries)
}

fn add_entries(conn: &Connection, entries: Vec<Entry>) -> DbResult<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO log (rowid, entry_timestamp, facility, severity, version, \
             msg_timestamp, hostname, app_name, procid, msgid, data, msg) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for entry in &entries {
            stmt.execute(rusqlite::params![
                entry.id,
                ts_to_real(entry.timestamp),
                entry.msg.facility.code(),
                entry.msg.severity.code(),
                entry.msg.version,
                entry.msg.timestamp.map(ts_to_real),
                entry.msg.hostname,
                entry.msg.app_name,
                entry.msg.procid,
                entry.msg.msgid,
                encode_data(entry.msg.data.as_ref())?,
                entry.msg.msg,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn query(conn: &Connection, filter: &Filter) -> DbResult<Vec<Entry>> {
    let mut conditions = Vec::new();
    if filter.last_id.is_some() {
        conditions.push("rowid <= :last_id");
    }
    if filter.entry_timestamp_from.is_some() {
        conditions.push("entry_timestamp >= :entry_timestamp_from");
    }
    if filter.entry_timestamp_to.is_some() {
        conditions.push("entry_timestamp <= :entry_timestamp_to");
    }
    if filter.facility.is_some() {
        conditions.push("facility = :facility");
    }
    if filter.severity.is_some() {
        conditions.push("severity = :severity");
    }
    if non_empty(&filter.hostname) {
        conditions.push("hostname LIKE :hostname");
    }
    if non_empty(&filter.app_name) {
        conditions.push("app_name LIKE :app_name");
    }
    if non_empty(&filter.procid) {
        conditions.push("procid LIKE :procid");
    }
    if non_empty(&filter.msgid) {
        conditions.push("msgid LIKE :msgid");
    }
    if non_empty(&filter.msg) {
        conditions.push("msg LIKE :msg");
    }

    let mut sql = "SELECT rowid, entry_timestamp, facility, severity, version, msg_timestamp, \
                   hostname, app_name, procid, msgid, data, msg FROM log"
        .to_owned();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY rowid DESC");
    if filter.max_results.is_some() {
        sql.push_str(" LIMIT :max_results");
    }

    let mut stmt = conn.prepare(&sql)?;
    let like = |s: &Option<String>| s.clone().map(|v| format!("%{v}%"));
    let rows = stmt.query_map(
        rusqlite::named_params! {
            ":last_id": filter.last_id,
            ":entry_timestamp_from": filter.entry_timestamp_from.map(ts_to_real),
            ":entry_timestamp_to": filter.entry_timestamp_to.map(ts_to_real),
            ":facility": filter.facility.map(Facility::code),
            ":severity": filter.severity.map(Severity::code),
            ":hostname": like(&filter.hostname),
            ":app_name": like(&filter.app_name),
            ":procid": like(&filter.procid),
            ":msgid": like(&filter.msgid),
            ":msg": like(&filter.msg),
            ":max_results": filter.max_results,
        },
        row_to_entry,
    )?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(DbError::from)
        .and_then(|rows| rows.into_iter().collect())
}

fn delete(conn: &Connection, first_id: Option<i64>) -> DbResult<u64> {
    let changed = match first_id {
        Some(id) => conn.execute("DELETE FROM log WHERE rowid < ?1", [id])?,
        None => conn.execute("DELETE FROM log", [])?,
    };
    Ok(changed as u64)
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<DbResult<Entry>> {
    let id: i64 = row.get(0)?;
    let entry_ts: f64 = row.get(1)?;
    let facility_code: u8 = row.get(2)?;
    let severity_code: u8 = row.get(3)?;
    let version: u16 = row.get(4)?;
    let msg_ts: Option<f64> = row.get(5)?;
    let hostname: Option<String> = row.get(6)?;
    let app_name: Option<String> = row.get(7)?;
    let procid: Option<String> = row.get(8)?;
    let msgid: Option<String> = row.get(9)?;
    let data: Option<String> = row.get(10)?;
    let msg: Option<String> = row.get(11)?;

    let built = (|| -> DbResult<Entry> {
        Ok(Entry {
            id,
            timestamp: real_to_ts(entry_ts),
            msg: Msg {
                facility: Facility::try_from(facility_code)
                    .map_err(|e| DbError::CorruptEnum(e.to_string()))?,
                severity: Severity::try_from(severity_code)
                    .map_err(|e| DbError::CorruptEnum(e.to_string()))?,
                version,
                timestamp: msg_ts.map(real_to_ts),
                hostname,
                app_name,
                procid,
                msgid,
                data: decode_data(data.as_deref())?,
                msg,
            },
        })
    })();
    Ok(built)
}

fn non_empty(s: &Option<String>) -> bool {
    s.as_deref().is_some_and(|v| !v.is_empty())
}

fn ts_to_real(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1_000_000.0
}

fn real_to_ts(real: f64) -> DateTime<Utc> {
    let secs = real.floor() as i64;
    let micros = ((real - real.floor()) * 1_000_000.0).round() as u32;
    Utc.timestamp_opt(secs, micros * 1_000)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(secs, 0).single().unwrap())
}

fn encode_data(data: Option<&SdData>) -> DbResult<Option<String>> {
    match data {
        None => Ok(None),
        Some(d) if d.is_empty() => Ok(None),
        Some(d) => Ok(Some(serde_json::to_string(d)?)),
    }
}

fn decode_data(data: Option<&str>) -> DbResult<Option<SdData>> {
    match data {
        None => Ok(None),
        Some(s) => {
            let parsed: BTreeMap<String, BTreeMap<String, String>> = serde_json::from_str(s)?;
            Ok(Some(parsed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syslog_proto::{Facility, Severity};

    fn sample_msg(body: &str) -> Msg {
        Msg {
            facility: Facility::USER,
            severity: Severity::NOTICE,
            version: 1,
            timestamp: None,
            hostname: None,
            app_name: None,
            procid: None,
            msgid: None,
            data: None,
            msg: Some(body.to_owned()),
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let handle = Db::open_in_memory().unwrap();
        let entries = handle.db.add_msgs(Vec::new()).await.unwrap();
        assert!(entries.is_empty());
        assert_eq!(handle.db.get_first_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_msgs_assigns_contiguous_ascending_ids() {
        let handle = Db::open_in_memory().unwrap();
        let now = Utc::now();
        let batch = vec![
            (now, sample_msg("a")),
            (now, sample_msg("b")),
            (now, sample_msg("c")),
        ];
        let entries = handle.db.add_msgs(batch).await.unwrap();
        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(handle.db.get_first_id().await.unwrap(), Some(1));
        assert_eq!(handle.db.get_last_id().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn query_orders_newest_first_and_honors_max_results() {
        let handle = Db::open_in_memory().unwrap();
        let now = Utc::now();
        let batch = vec![
            (now, sample_msg("a")),
            (now, sample_msg("b")),
            (now, sample_msg("c")),
        ];
        handle.db.add_msgs(batch).await.unwrap();

        let all = handle.db.query(Filter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.msg.msg.clone()).collect::<Vec<_>>(),
            vec![Some("c".to_owned()), Some("b".to_owned()), Some("a".to_owned())]
        );

        let limited = handle
            .db
            .query(Filter {
                max_results: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].msg.msg, Some("c".to_owned()));
    }

    #[tokio::test]
    async fn delete_below_first_id_removes_older_rows_only() {
        let handle = Db::open_in_memory().unwrap();
        let now = Utc::now();
        let batch = vec![
            (now, sample_msg("a")),
            (now, sample_msg("b")),
            (now, sample_msg("c")),
            (now, sample_msg("d")),
        ];
        handle.db.add_msgs(batch).await.unwrap();

        let removed = handle.db.delete(Some(3)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(handle.db.get_first_id().await.unwrap(), Some(3));
        assert_eq!(handle.db.get_last_id().await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn add_entries_preserves_caller_supplied_ids() {
        let handle = Db::open_in_memory().unwrap();
        let now = Utc::now();
        let entries = vec![
            Entry {
                id: 7,
                timestamp: now,
                msg: sample_msg("seven"),
            },
            Entry {
                id: 9,
                timestamp: now,
                msg: sample_msg("nine"),
            },
        ];
        handle.db.add_entries(entries).await.unwrap();
        let all = handle.db.query(Filter::default()).await.unwrap();
        let ids: Vec<i64> = all.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![9, 7]);
    }

    #[tokio::test]
    async fn structured_data_round_trips_through_storage() {
        let handle = Db::open_in_memory().unwrap();
        let mut data = BTreeMap::new();
        let mut params = BTreeMap::new();
        params.insert("iut".to_owned(), "3".to_owned());
        data.insert("exampleSDID@32473".to_owned(), params);

        let mut msg = sample_msg("with data");
        msg.data = Some(data.clone());
        handle.db.add_msgs(vec![(Utc::now(), msg)]).await.unwrap();

        let all = handle.db.query(Filter::default()).await.unwrap();
        assert_eq!(all[0].msg.data, Some(data));
    }
}
