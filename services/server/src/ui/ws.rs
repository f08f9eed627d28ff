//! Axum route wiring for the observer WebSocket endpoint.
//!
//! Grounded on the old server's `ws_receiver.rs` upgrade-handler shape
//! (`WebSocketUpgrade` + `on_upgrade`), adapted: this endpoint has no
//! authentication surface since `ui.py`'s observer connections are bound
//! only to a local/trusted listener address.

use std::sync::Arc;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::ui::session::run_session_loop;

pub fn router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/syslog/ws", get(observer_ws_handler))
        .with_state(backend)
}

async fn observer_ws_handler(
    ws: WebSocketUpgrade,
    State(backend): State<Arc<Backend>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = run_session_loop(AxumWsAdapter(socket), backend.as_ref()).await {
            warn!(error = %e, "observer session ended with error");
        } else {
            debug!("observer session closed");
        }
    })
}

/// Bridges axum's `WebSocket` message type to the tungstenite one
/// `run_session_loop` is written against, so the session loop stays usable
/// against both a live axum socket and a plain tungstenite client in tests.
struct AxumWsAdapter(WebSocket);

impl Stream for AxumWsAdapter {
    type Item = Result<Message, tokio_tungstenite::tungstenite::Error>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.0).poll_next(cx).map(|opt| {
            opt.map(|res| {
                res.map(from_axum_message)
                    .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e)))
            })
        })
    }
}

impl Sink<Message> for AxumWsAdapter {
    type Error = tokio_tungstenite::tungstenite::Error;

    fn poll_ready(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.0)
            .poll_ready(cx)
            .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e)))
    }

    fn start_send(self: std::pin::Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.0)
            .start_send(to_axum_message(item))
            .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e)))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.0)
            .poll_flush(cx)
            .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e)))
    }

    fn poll_close(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        std::pin::Pin::new(&mut this.0)
            .poll_close(cx)
            .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e)))
    }
}

fn from_axum_message(msg: AxumMessage) -> Message {
    match msg {
        AxumMessage::Text(t) => Message::Text(t.to_string().into()),
        AxumMessage::Binary(b) => Message::Binary(b),
        AxumMessage::Ping(p) => Message::Ping(p),
        AxumMessage::Pong(p) => Message::Pong(p),
        // Session loop only acts on Text/Ping/Close; a lossless frame
        // reconstruction isn't needed for a close the loop is about to end.
        AxumMessage::Close(_) => Message::Close(None),
    }
}

fn to_axum_message(msg: Message) -> AxumMessage {
    match msg {
        Message::Text(t) => AxumMessage::Text(t.to_string().into()),
        Message::Binary(b) => AxumMessage::Binary(b),
        Message::Ping(p) => AxumMessage::Ping(p),
        Message::Pong(p) => AxumMessage::Pong(p),
        Message::Close(_) => AxumMessage::Close(None),
        Message::Frame(_) => AxumMessage::Binary(Vec::new().into()),
    }
}
