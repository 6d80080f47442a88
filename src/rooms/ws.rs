use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, Query, State, WebSocketUpgrade, ws::{CloseFrame, Message, WebSocket}},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::{SplitSink, SplitStream}};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    AppState,
    db::{Room, User},
    error::ProtocolError,
    rooms::{is_valid_room_name, msg::{self, ClientEvent, ClientEventKind}},
    session::{OUTBOUND_BUFFER, SessionHandle, SessionState},
};

const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

#[derive(Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_name): Path<String>,
    Query(WsQuery { token }): Query<WsQuery>,
    State(state): State<AppState>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(state, socket, room_name, token))
}

enum HandshakeFailure {
    PolicyViolation(&'static str),
    Internal(&'static str),
}

impl HandshakeFailure {
    fn close_code(&self) -> u16 {
        match self {
            Self::PolicyViolation(_) => CLOSE_POLICY_VIOLATION,
            Self::Internal(_) => CLOSE_INTERNAL_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match *self {
            Self::PolicyViolation(reason) | Self::Internal(reason) => reason,
        }
    }
}

/// One task per connection. Registered with the supervisor before the
/// handshake outcome is known; guaranteed to deregister on every exit path.
async fn run_session(
    state: AppState,
    socket: WebSocket,
    room_name: String,
    token: Option<String>,
) {
    let (mut sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let handle = Arc::new(SessionHandle::new(tx));
    state.supervisor.register(handle.clone()).await;

    let (user, room) = match handshake(&state, &handle, &room_name, token.as_deref()).await {
        Ok(ok) => ok,
        Err(failure) => {
            handle.set_state(SessionState::Closing);
            let close = CloseFrame {
                code: failure.close_code(),
                reason: failure.reason().into(),
            };
            let _ = sink.send(Message::Close(Some(close))).await;
            handle.set_state(SessionState::Closed);
            state.supervisor.remove(handle.id).await;
            return;
        }
    };

    handle.set_state(SessionState::Active);
    info!(room = %room.name, user = %user.username, session = %handle.id, "websocket connected");

    let mut writer = tokio::spawn(write_outbound(rx, sink));
    let mut reader = {
        let state = state.clone();
        let room = room.clone();
        let user = user.clone();
        tokio::spawn(read_inbound(state, room, user, stream))
    };

    // Whichever half stops first (peer close, transport error, or a
    // shutdown signaled by the hub or supervisor) takes the other with it.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
        _ = handle.wait_closed() => {
            writer.abort();
            reader.abort();
        }
    }

    handle.set_state(SessionState::Closing);
    handle.shutdown();
    state.registry.leave(&room.name, handle.id).await;
    state.supervisor.remove(handle.id).await;
    handle.set_state(SessionState::Closed);
    info!(room = %room.name, user = %user.username, session = %handle.id, "websocket disconnected");
}

async fn handshake(
    state: &AppState,
    handle: &Arc<SessionHandle>,
    room_name: &str,
    token: Option<&str>,
) -> Result<(User, Room), HandshakeFailure> {
    handle.set_state(SessionState::Authenticating);

    if !is_valid_room_name(room_name) {
        warn!(room = room_name, "rejecting connect to invalid room name");
        return Err(HandshakeFailure::PolicyViolation("invalid room name"));
    }

    let user = state.verifier.verify(token).await.map_err(|e| {
        warn!(room = room_name, error = %e, "authentication failed");
        HandshakeFailure::PolicyViolation("authentication failed")
    })?;

    handle.set_state(SessionState::Joining);
    let room = state.registry.get_or_create(room_name).await.map_err(|e| {
        error!(room = room_name, error = %e, "room setup failed");
        HandshakeFailure::Internal("room setup failed")
    })?;
    state.registry.join(room_name, handle.clone()).await;

    Ok((user, room))
}

async fn write_outbound(mut rx: mpsc::Receiver<String>, mut sink: SplitSink<WebSocket, Message>) {
    while let Some(frame) = rx.recv().await {
        if sink.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
}

async fn read_inbound(state: AppState, room: Room, user: User, mut stream: SplitStream<WebSocket>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => handle_frame(&state, &room, &user, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(&state, &room, &user, text).await,
                Err(_) => warn!(room = %room.name, "dropping non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(room = %room.name, error = %e, "websocket transport error");
                break;
            }
        }
    }
}

/// One inbound application event. Protocol errors are recovered locally:
/// the frame is dropped and the channel stays open.
async fn handle_frame(state: &AppState, room: &Room, user: &User, raw: &str) {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!(
                room = %room.name,
                user = %user.username,
                error = %ProtocolError::MalformedPayload(e),
                "dropping inbound frame"
            );
            return;
        }
    };

    match event.kind {
        ClientEventKind::ChatMessage => {
            let content = event.content.trim();
            if content.is_empty() {
                return;
            }

            if let Err(e) = msg::send_msg(&state.db_pool, &state.hub, room, user, content).await {
                // The sender gets no error event; the attempt only survives
                // in the logs.
                error!(
                    room = %room.name,
                    user = %user.username,
                    error = %e,
                    "failed to persist message, nothing broadcast"
                );
            }
        }
    }
}
