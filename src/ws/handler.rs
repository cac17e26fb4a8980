//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::state::JoinError;
use crate::game::{MatchId, PlayerId};
use crate::http::AppError;
use crate::util::rate_limit::ActionRateLimiter;
use crate::ws::connections::Outbound;
use crate::ws::protocol::{ActionMsg, ServerMsg};

const MAX_NAME_LEN: usize = 32;
const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub name: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let name = query.name.trim().to_string();
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::BadRequest(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, name, state)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, name: String, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();

    // Register before joining so the first snapshot already has somewhere to go
    let player_id = Uuid::new_v4();
    let channels = state.connections.register(player_id);

    let joined = match state.lobby.join(player_id, name.clone()).await {
        Ok(joined) => joined,
        Err(e) => {
            info!(name = %name, error = %e, "Join refused");
            state.connections.remove(&player_id);
            refuse(&mut ws_sink, &e).await;
            return;
        }
    };
    info!(player_id = %player_id, match_id = %joined.match_id, name = %name, "Player connected");

    let welcome = ServerMsg::Welcome {
        player_id,
        match_id: joined.match_id,
        server_time: Utc::now(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        warn!(player_id = %player_id, error = %e, "Failed to send welcome");
        state.connections.remove(&player_id);
        state.matches.notify_disconnect(player_id);
        channels.closed.send_replace(true);
        return;
    }

    let writer = tokio::spawn(write_loop(
        player_id,
        ws_sink,
        channels.outbound_rx,
        channels.cancel.clone(),
        state.config.write_timeout,
    ));

    read_loop(player_id, joined.match_id, ws_stream, &channels.cancel, &state).await;

    // Reader is done; stop the writer and wait for it
    channels.cancel.send_replace(true);
    if let Err(e) = writer.await {
        warn!(player_id = %player_id, error = %e, "Writer task failed");
    }

    state.connections.remove(&player_id);
    state.matches.notify_disconnect(player_id);
    channels.closed.send_replace(true);

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Tell a refused client why, then close with "try again later"
async fn refuse(sink: &mut SplitSink<WebSocket, Message>, error: &JoinError) {
    let (code, reason) = match error {
        JoinError::MatchFull => ("match_full", "Game is full"),
        JoinError::MatchBusy => ("match_busy", "Server busy"),
        JoinError::MatchClosed => ("match_closed", "Match unavailable"),
    };

    let refusal = ServerMsg::Error {
        code: code.to_string(),
        message: error.to_string(),
    };
    let _ = send_msg(sink, &refusal).await;
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::AGAIN,
            reason: reason.into(),
        })))
        .await;
}

/// Resolves once the connection is cancelled. The watch guard is dropped
/// before returning so callers stay `Send`.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|c| *c).await;
}

/// Socket -> match inbox, until the peer goes away, idles out, or the
/// connection is cancelled
async fn read_loop(
    player_id: PlayerId,
    match_id: MatchId,
    mut ws_stream: SplitStream<WebSocket>,
    cancel: &watch::Sender<bool>,
    state: &AppState,
) {
    let rate_limiter = ActionRateLimiter::new(state.config.input_rate_limit);
    let read_timeout = state.config.read_timeout;
    let mut cancel_rx = cancel.subscribe();

    loop {
        let frame = tokio::select! {
            _ = cancelled(&mut cancel_rx) => break,
            frame = timeout(read_timeout, ws_stream.next()) => frame,
        };

        match frame {
            Err(_) => {
                info!(player_id = %player_id, "Read deadline passed, dropping connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(player_id = %player_id, error = %e, "WebSocket read error");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                if !rate_limiter.check() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                match ActionMsg::parse(&text, player_id, Utc::now()) {
                    Ok(action) => {
                        if let Err(e) = state.matches.submit(match_id, action) {
                            warn!(player_id = %player_id, match_id = %match_id, error = %e, "Dropped action");
                        }
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Ok(Some(Ok(Message::Binary(_)))) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}

/// Outbound queue -> socket, with keepalive pings. Closes the socket after
/// the final snapshot.
async fn write_loop<S>(
    player_id: PlayerId,
    mut ws_sink: S,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    cancel: Arc<watch::Sender<bool>>,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut cancel_rx = cancel.subscribe();
    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancelled(&mut cancel_rx) => break,

            next = outbound_rx.recv() => {
                let Some(outbound) = next else { break };

                let text = match std::str::from_utf8(&outbound.payload) {
                    Ok(text) => text.to_owned(),
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Snapshot is not UTF-8, skipping");
                        continue;
                    }
                };
                if !write(&mut ws_sink, Message::Text(text), write_timeout, player_id).await {
                    break;
                }

                if outbound.is_final {
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "Match over".into(),
                    }));
                    write(&mut ws_sink, close, write_timeout, player_id).await;
                    break;
                }
            }

            _ = ping.tick() => {
                if !write(&mut ws_sink, Message::Ping(Vec::new()), write_timeout, player_id).await {
                    break;
                }
            }
        }
    }

    // Take the reader down with us
    cancel.send_replace(true);
}

/// Write one frame within the deadline; false if the connection should close
async fn write<S>(sink: &mut S, msg: Message, write_timeout: Duration, player_id: PlayerId) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(write_timeout, sink.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            false
        }
        Err(_) => {
            warn!(player_id = %player_id, "Write deadline passed, dropping connection");
            false
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn spawn_writer(
        outbound_rx: mpsc::Receiver<Outbound>,
    ) -> (
        futures::channel::mpsc::Receiver<Message>,
        Arc<watch::Sender<bool>>,
        tokio::task::JoinHandle<()>,
    ) {
        let (sink, frames) = futures::channel::mpsc::channel::<Message>(16);
        let (cancel, _) = watch::channel(false);
        let cancel = Arc::new(cancel);
        // Spawning requires the writer future to be Send
        let writer = tokio::spawn(write_loop(
            Uuid::new_v4(),
            sink,
            outbound_rx,
            cancel.clone(),
            Duration::from_secs(1),
        ));
        (frames, cancel, writer)
    }

    #[tokio::test]
    async fn writer_closes_socket_after_final_snapshot() {
        let (tx, rx) = mpsc::channel(4);
        let (frames, cancel, writer) = spawn_writer(rx);

        tx.send(Outbound {
            payload: Bytes::from_static(b"{\"tick\":1}"),
            is_final: false,
        })
        .await
        .unwrap();
        tx.send(Outbound {
            payload: Bytes::from_static(b"{\"tick\":2}"),
            is_final: true,
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .expect("writer should stop after the final snapshot")
            .unwrap();

        let frames: Vec<Message> = frames
            .filter(|m| futures::future::ready(!matches!(m, Message::Ping(_))))
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Message::Text(t) if t == "{\"tick\":1}"));
        assert!(matches!(&frames[1], Message::Text(t) if t == "{\"tick\":2}"));
        assert!(matches!(&frames[2], Message::Close(Some(f)) if f.code == close_code::NORMAL));
        assert!(*cancel.borrow());
    }

    #[tokio::test]
    async fn writer_stops_when_cancelled() {
        let (_tx, rx) = mpsc::channel(4);
        let (_frames, cancel, writer) = spawn_writer(rx);

        cancel.send_replace(true);
        tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .expect("cancelled writer should stop")
            .unwrap();
    }
}
