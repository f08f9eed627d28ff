//! Per-observer session loop: runs over the backend's change broadcast and
//! an inbound stream of `SetFilter` requests, pushing a `StateSync` whenever
//! the session's visible entry set changes.
//!
//! Grounded on the original `ui.py`'s `_on_connection`/`_on_request`
//! (`_sanitize_filter` clamp, full re-query on filter change, incremental
//! append-and-truncate on stable filter), generalized to a `tokio::select!`
//! loop the way the teacher's `session.rs` multiplexes its own WS session.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use syslog_proto::{Entry, Filter, SetFilter, StateSync, MAX_RESULTS_LIMIT};

use crate::backend::{Backend, BackendError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
}

/// Clamps an observer-supplied filter's `max_results` to the global limit,
/// matching `_sanitize_filter`.
pub fn sanitize_filter(mut filter: Filter) -> Filter {
    filter.max_results = Some(match filter.max_results {
        None => MAX_RESULTS_LIMIT,
        Some(n) if n > MAX_RESULTS_LIMIT => MAX_RESULTS_LIMIT,
        Some(n) => n,
    });
    filter
}

/// Runs one observer session to completion. `socket` is any text-message WS
/// stream/sink (production: an axum `WebSocket`; tests: a tungstenite
/// client stream) so the loop itself stays transport-agnostic.
pub async fn run_session_loop<S>(
    mut socket: S,
    backend: &Backend,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let mut changes = backend.subscribe();
    let mut filter = sanitize_filter(Filter::default());
    let mut state = initial_state(backend, &filter).await?;
    send_state(&mut socket, &state).await?;

    loop {
        tokio::select! {
            changed = changes.recv() => {
                match changed {
                    Ok(new_entries) => {
                        let last_id = backend.bounds().await.last_id.unwrap_or(0);
                        if !apply_change(&mut state, &filter, new_entries, last_id) {
                            state = full_requery(backend, &filter).await?;
                        }
                        send_state(&mut socket, &state).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "observer session lagged, re-querying");
                        state = full_requery(backend, &filter).await?;
                        send_state(&mut socket, &state).await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => return Err(SessionError::Ws(e)),
                    Some(Ok(Message::Text(text))) => {
                        match parse_set_filter(&text) {
                            Some(new_filter) => {
                                filter = sanitize_filter(new_filter);
                                state = full_requery(backend, &filter).await?;
                                send_state(&mut socket, &state).await?;
                            }
                            None => debug!("ignoring unrecognized observer message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    Ok(())
}

/// Accepts either a bare `SetFilter` document or `{"filter": ...}`.
fn parse_set_filter(text: &str) -> Option<Filter> {
    if let Ok(set_filter) = serde_json::from_str::<SetFilter>(text) {
        return Some(set_filter.filter);
    }
    serde_json::from_str::<Filter>(text).ok()
}

async fn initial_state(backend: &Backend, filter: &Filter) -> Result<StateSync, BackendError> {
    full_requery(backend, filter).await
}

async fn full_requery(backend: &Backend, filter: &Filter) -> Result<StateSync, BackendError> {
    let entries = backend.query(filter.clone()).await?;
    let bounds = backend.bounds().await;
    Ok(StateSync {
        filter: filter.clone(),
        entries,
        first_id: bounds.first_id,
        last_id: bounds.last_id,
    })
}

/// Incrementally folds a change notification into `state` when the filter
/// is unchanged: drops any entry no newer than the snapshot's current head
/// (a notification can race the initial/full-requery snapshot and repeat
/// entries already in it), filters what's left, prepends it (entries arrive
/// newest-first), and truncates back to `max_results`. Returns `false` when
/// the notification is empty (a retention-only change) and a full re-query
/// is needed instead, since a cleanup can move `first_id` out from under
/// the cached snapshot.
///
/// `last_id` is the backend's current last id, independent of what matches
/// the filter: the published `last_id` always tracks the log's true tail.
fn apply_change(state: &mut StateSync, filter: &Filter, new_entries: Vec<Entry>, last_id: i64) -> bool {
    if new_entries.is_empty() {
        return false;
    }
    state.last_id = Some(last_id);

    let previous_head_id = state.entries.first().map_or(0, |e| e.id);
    let mut matching: Vec<Entry> = new_entries
        .into_iter()
        .filter(|e| e.id > previous_head_id)
        .filter(|e| filter.matches(e))
        .collect();
    if matching.is_empty() {
        return true;
    }
    matching.append(&mut state.entries);
    let limit = filter.max_results.unwrap_or(MAX_RESULTS_LIMIT) as usize;
    matching.truncate(limit);
    state.entries = matching;
    true
}

async fn send_state<S>(socket: &mut S, state: &StateSync) -> Result<(), SessionError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(state).expect("StateSync always serializes");
    socket.send(Message::Text(text.into())).await?;
    Ok(())
}
