use std::time::Duration;

use actix::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{info, warn};
use uuid::Uuid;

use crate::chess::movegen;
use crate::chess::piece::{Color, PieceKind};
use crate::chess::square::Square;
use crate::game::controller::{MatchStatus, TerminationReason};
use crate::models::room::{generate_room_code, normalize_room_code};
use crate::models::{AppState, ClientMessage, RoomSeats, ServerMessage, SessionText};
use crate::sync::bridge::{SubmitOutcome, SyncBridge};
use crate::sync::store::{MatchStateChanged, MemoryStore, SnapshotStore, VersionedSnapshot};

const DEFAULT_MINUTES: u64 = 10;

/// WebSocket session for one participant (or spectator) in a room. Each
/// seated player runs its own `SyncBridge` against the shared store; the
/// store's conditional writes arbitrate between them.
pub struct MatchSocket {
    pub id: String,
    pub app_state: web::Data<AppState>,
    pub room: String,
    pub color: Option<Color>,
    bridge: Option<SyncBridge<MemoryStore>>,
    ticker: Option<SpawnHandle>,
}

/// A new authoritative snapshot, fanned out to every session in the room.
/// The room document cannot carry a termination reason, so the committing
/// session passes its own alongside the snapshot.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct SnapshotBroadcast {
    pub message_type: String,
    pub room: String,
    pub snapshot: VersionedSnapshot,
    pub reason: Option<String>,
}

impl Actor for MatchSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        self.app_state
            .sessions
            .lock()
            .unwrap()
            .insert(self.id.clone(), addr);

        let total_sessions = self.app_state.sessions.lock().unwrap().len();
        info!("WebSocket connection started: {}", self.id);
        info!("Total active sessions: {}", total_sessions);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if !self.room.is_empty() {
            let mut connections = self.app_state.connections.lock().unwrap();
            let room_empty = if let Some(connection_ids) = connections.get_mut(&self.room) {
                connection_ids.retain(|id| id != &self.id);
                info!("Removed player {} from room {}", self.id, self.room);
                connection_ids.is_empty()
            } else {
                false
            };

            // Free the seat so a reconnecting player can take it back.
            let mut seats = self.app_state.seats.lock().unwrap();
            if let Some(room_seats) = seats.get_mut(&self.room) {
                if room_seats.white.as_ref() == Some(&self.id) {
                    room_seats.white = None;
                }
                if room_seats.black.as_ref() == Some(&self.id) {
                    room_seats.black = None;
                }
            }

            // Disconnects never terminate the match; the room document is
            // dropped only once nobody is connected to it anymore.
            if room_empty {
                info!("No more players in room {}. Cleaning up.", self.room);
                connections.remove(&self.room);
                seats.remove(&self.room);
                self.app_state.store.remove(&self.room);
            }
        }

        self.app_state.sessions.lock().unwrap().remove(&self.id);
        info!("WebSocket connection closed: {}", self.id);
        Running::Stop
    }
}

impl Handler<SessionText> for MatchSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<SnapshotBroadcast> for MatchSocket {
    type Result = ();

    fn handle(&mut self, msg: SnapshotBroadcast, ctx: &mut Self::Context) {
        if msg.room != self.room {
            return;
        }
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.on_change(MatchStateChanged {
                room: msg.room.clone(),
                snapshot: msg.snapshot.clone(),
            });
            // The committer knows why the match ended better than any
            // re-derivation from the document.
            if let Some(reason) = msg.reason.as_deref().and_then(TerminationReason::from_str) {
                bridge.set_termination_reason(reason);
            }
        }

        let doc = &msg.snapshot.doc;
        if doc.game_started && !doc.game_over {
            self.ensure_ticker(ctx);
        } else {
            self.stop_ticker(ctx);
        }

        let mut reply = self.state_message(&msg.message_type, &msg.snapshot);
        if msg.reason.is_some() {
            // Spectators have no bridge to patch; pass the reason through.
            reply.reason = msg.reason.clone();
        }
        self.send_message(ctx, &reply);
    }
}

// WebSocket message handler
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MatchSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => {
                match serde_json::from_str::<ClientMessage>(text.as_ref()) {
                    Ok(client_msg) => {
                        self.handle_message(client_msg, ctx);
                    }
                    Err(e) => {
                        warn!("Error parsing client message: {}", e);
                        let reply = ServerMessage::error(None, format!("Invalid message format: {}", e));
                        self.send_message(ctx, &reply);
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages are not supported");
                let reply = ServerMessage::error(None, "Binary messages are not supported");
                self.send_message(ctx, &reply);
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Connection closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            _ => {
                ctx.stop();
            }
        }
    }
}

impl MatchSocket {
    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(text) => ctx.text(text),
            Err(e) => {
                warn!("Failed to serialize response: {}", e);
                ctx.text("{\"error\": \"Internal server error\"}");
            }
        }
    }

    fn state_message(&self, message_type: &str, snapshot: &VersionedSnapshot) -> ServerMessage {
        let doc = &snapshot.doc;
        let status = if doc.game_over {
            "terminated"
        } else if doc.game_started {
            "in_progress"
        } else {
            "waiting"
        };
        let reason = self.bridge.as_ref().and_then(|bridge| {
            bridge
                .controller()
                .state()
                .termination
                .map(|t| t.reason.as_str().to_string())
        });
        ServerMessage {
            message_type: message_type.to_string(),
            room: Some(self.room.clone()),
            fen: Some(doc.game_state.clone()),
            color: Some(
                self.color
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "spectator".to_string()),
            ),
            status: Some(status.to_string()),
            reason,
            winner: doc.winner.clone(),
            white_time: Some(doc.white_time),
            black_time: Some(doc.black_time),
            last_move: doc.last_move_squares.clone(),
            version: Some(snapshot.version),
            ..Default::default()
        }
    }

    fn broadcast_snapshot(&self, message_type: &str, snapshot: &VersionedSnapshot) {
        let connection_ids;
        let sessions_copy;
        {
            let connections = self.app_state.connections.lock().unwrap();
            match connections.get(&self.room) {
                Some(ids) => connection_ids = ids.clone(),
                None => return,
            }
            sessions_copy = self.app_state.sessions.lock().unwrap().clone();
        }

        let reason = self.bridge.as_ref().and_then(|bridge| {
            bridge
                .controller()
                .state()
                .termination
                .map(|t| t.reason.as_str().to_string())
        });
        for connection_id in &connection_ids {
            if let Some(addr) = sessions_copy.get(connection_id) {
                addr.do_send(SnapshotBroadcast {
                    message_type: message_type.to_string(),
                    room: self.room.clone(),
                    snapshot: snapshot.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }

    /// Broadcast whatever the store currently holds for this room.
    fn broadcast_current(&self, message_type: &str) {
        if let Some(snapshot) = self.app_state.store.read(&self.room) {
            self.broadcast_snapshot(message_type, &snapshot);
        }
    }

    /// Send an already-built message to every other session in the room.
    fn broadcast_text(&self, message: &ServerMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize broadcast: {}", e);
                return;
            }
        };
        let connections = self.app_state.connections.lock().unwrap();
        let sessions = self.app_state.sessions.lock().unwrap();
        if let Some(connection_ids) = connections.get(&self.room) {
            for connection_id in connection_ids {
                if connection_id == &self.id {
                    continue;
                }
                if let Some(addr) = sessions.get(connection_id) {
                    addr.do_send(SessionText(text.clone()));
                }
            }
        }
    }

    fn ensure_ticker(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.ticker.is_some() || self.color.is_none() {
            return;
        }
        // One local tick per second; the bridge batches clock publishes and
        // pushes terminations immediately.
        let handle = ctx.run_interval(Duration::from_secs(1), |act, ctx| {
            let (published, still_running) = match act.bridge.as_mut() {
                Some(bridge) => {
                    let before = bridge.last_seen_version();
                    bridge.tick();
                    (
                        bridge.last_seen_version() != before,
                        bridge.controller().status() == MatchStatus::InProgress,
                    )
                }
                None => return,
            };
            if published {
                if let Some(snapshot) = act.app_state.store.read(&act.room) {
                    let kind = if snapshot.doc.game_over {
                        "terminated"
                    } else {
                        "clock_update"
                    };
                    act.broadcast_snapshot(kind, &snapshot);
                }
            }
            if !still_running {
                act.stop_ticker(ctx);
            }
        });
        self.ticker = Some(handle);
    }

    fn stop_ticker(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(handle) = self.ticker.take() {
            ctx.cancel_future(handle);
        }
    }

    pub fn handle_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg.message_type.as_str() {
            "create" => self.handle_create(msg, ctx),
            "join" => self.handle_join(msg, ctx),
            "move" => self.handle_move(msg, ctx),
            "get_moves" => self.handle_get_moves(msg, ctx),
            "abort" => self.handle_abort(ctx),
            "rematch" => self.handle_rematch(ctx),
            "time_sync" => self.handle_time_sync(ctx),
            other => {
                info!("Unknown message type: {}", other);
                let reply =
                    ServerMessage::error(None, format!("Unknown message type: {}", other));
                self.send_message(ctx, &reply);
            }
        }
    }

    fn handle_create(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.room.is_empty() {
            let reply = ServerMessage::error(Some(self.room.clone()), "Already in a room");
            self.send_message(ctx, &reply);
            return;
        }
        let minutes = msg.minutes.unwrap_or(DEFAULT_MINUTES).clamp(1, 180);
        let seconds_per_side = (minutes * 60) as u32;

        let mut code = generate_room_code();
        while self.app_state.store.room_exists(&code) {
            code = generate_room_code();
        }

        let mut bridge = SyncBridge::new(
            self.app_state.store.clone(),
            &code,
            Color::White,
            seconds_per_side,
        );
        if bridge.create_room().is_err() {
            let reply = ServerMessage::error(None, "Failed to create room");
            self.send_message(ctx, &reply);
            return;
        }

        self.app_state.seats.lock().unwrap().insert(
            code.clone(),
            RoomSeats {
                white: Some(self.id.clone()),
                black: None,
                seconds_per_side,
            },
        );
        self.app_state
            .connections
            .lock()
            .unwrap()
            .insert(code.clone(), vec![self.id.clone()]);

        self.room = code.clone();
        self.color = Some(Color::White);
        self.bridge = Some(bridge);
        info!("Player {} created room {}", self.id, code);

        if let Some(snapshot) = self.app_state.store.read(&code) {
            let reply = self.state_message("room_created", &snapshot);
            self.send_message(ctx, &reply);
        }
    }

    fn handle_join(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.room.is_empty() {
            let reply = ServerMessage::error(Some(self.room.clone()), "Already in a room");
            self.send_message(ctx, &reply);
            return;
        }
        let code = match msg.room.as_deref().and_then(normalize_room_code) {
            Some(code) => code,
            None => {
                let reply = ServerMessage::error(None, "Invalid room code");
                self.send_message(ctx, &reply);
                return;
            }
        };
        if !self.app_state.store.room_exists(&code) {
            info!("Cannot join: room {} not found", code);
            let reply = ServerMessage::error(Some(code), "Room not found");
            self.send_message(ctx, &reply);
            return;
        }

        let (color, seconds_per_side, both_seated) = {
            let mut seats = self.app_state.seats.lock().unwrap();
            let room_seats = match seats.get_mut(&code) {
                Some(room_seats) => room_seats,
                None => {
                    let reply = ServerMessage::error(Some(code.clone()), "Room not found");
                    self.send_message(ctx, &reply);
                    return;
                }
            };
            let color = if room_seats.white.is_none() {
                room_seats.white = Some(self.id.clone());
                Some(Color::White)
            } else if room_seats.black.is_none() {
                room_seats.black = Some(self.id.clone());
                Some(Color::Black)
            } else {
                // Room is full; join as a spectator.
                None
            };
            (
                color,
                room_seats.seconds_per_side,
                room_seats.white.is_some() && room_seats.black.is_some(),
            )
        };

        {
            let mut connections = self.app_state.connections.lock().unwrap();
            let connection_ids = connections.entry(code.clone()).or_default();
            if !connection_ids.contains(&self.id) {
                connection_ids.push(self.id.clone());
            }
        }

        self.room = code.clone();
        self.color = color;
        if let Some(side) = color {
            let mut bridge = SyncBridge::new(
                self.app_state.store.clone(),
                &code,
                side,
                seconds_per_side,
            );
            bridge.attach();
            self.bridge = Some(bridge);
        }
        info!(
            "Player {} joined room {} as {}",
            self.id,
            code,
            self.color.map(|c| c.as_str()).unwrap_or("spectator")
        );

        if let Some(snapshot) = self.app_state.store.read(&code) {
            let reply = self.state_message("room_joined", &snapshot);
            self.send_message(ctx, &reply);
        }
        self.broadcast_text(&ServerMessage {
            message_type: "player_joined".to_string(),
            room: Some(code.clone()),
            color: Some(
                self.color
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "spectator".to_string()),
            ),
            ..Default::default()
        });

        // Second seat filled: start the match and tell everyone.
        if both_seated && self.color.is_some() {
            let start = self
                .bridge
                .as_mut()
                .map(|bridge| bridge.start_match())
                .unwrap_or(Err(crate::game::controller::MatchError::MatchNotStarted));
            match start {
                Ok(SubmitOutcome::Committed(_)) => self.broadcast_current("match_started"),
                Ok(SubmitOutcome::Superseded) => {}
                Err(e) => info!("room {} not started: {}", code, e),
            }
        }
    }

    fn handle_move(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if self.room.is_empty() {
            let reply = ServerMessage::error(None, "Not in a room");
            self.send_message(ctx, &reply);
            return;
        }
        let bridge = match self.bridge.as_mut() {
            Some(bridge) => bridge,
            None => {
                let reply = ServerMessage::error(Some(self.room.clone()), "You are a spectator");
                self.send_message(ctx, &reply);
                return;
            }
        };
        let (from, to) = match (
            msg.move_from.as_deref().and_then(Square::from_algebraic),
            msg.move_to.as_deref().and_then(Square::from_algebraic),
        ) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                let reply =
                    ServerMessage::error(Some(self.room.clone()), "Move requires valid from and to squares");
                self.send_message(ctx, &reply);
                return;
            }
        };
        let promotion = msg
            .promote_to
            .as_deref()
            .and_then(|s| s.chars().next())
            .and_then(PieceKind::from_fen_char);

        match bridge.submit_move(from, to, promotion) {
            Ok(SubmitOutcome::Committed(_)) => {
                if let Some(snapshot) = self.app_state.store.read(&self.room) {
                    let kind = if snapshot.doc.game_over {
                        "terminated"
                    } else {
                        "move_made"
                    };
                    self.broadcast_snapshot(kind, &snapshot);
                }
            }
            Ok(SubmitOutcome::Superseded) => {
                // Lost a write race; the authoritative snapshot arrives via
                // broadcast and replaces local state. Not a user error.
                info!("move by {} in room {} superseded", self.id, self.room);
            }
            Err(e) => {
                let reply = ServerMessage::error(Some(self.room.clone()), e.to_string());
                self.send_message(ctx, &reply);
            }
        }
    }

    fn handle_get_moves(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if self.room.is_empty() {
            let reply = ServerMessage::error(None, "Not in a room");
            self.send_message(ctx, &reply);
            return;
        }
        let (position, color) = match (self.bridge.as_ref(), self.color) {
            (Some(bridge), Some(color)) => {
                (bridge.controller().state().position.clone(), color)
            }
            _ => {
                let reply = ServerMessage::error(Some(self.room.clone()), "You are a spectator");
                self.send_message(ctx, &reply);
                return;
            }
        };
        let from = match msg.move_from.as_deref().and_then(Square::from_algebraic) {
            Some(from) => from,
            None => {
                let reply = ServerMessage::error(Some(self.room.clone()), "No square provided");
                self.send_message(ctx, &reply);
                return;
            }
        };
        let piece = match position.piece_at(from) {
            Some(piece) => piece,
            None => {
                let reply =
                    ServerMessage::error(Some(self.room.clone()), "No piece on that square");
                self.send_message(ctx, &reply);
                return;
            }
        };
        if piece.color != color {
            let reply = ServerMessage::error(Some(self.room.clone()), "Not your piece");
            self.send_message(ctx, &reply);
            return;
        }

        let available: Vec<String> = movegen::legal_moves_from(&position, from)
            .iter()
            .map(|mv| mv.coord())
            .collect();
        let reply = ServerMessage {
            message_type: "available_moves".to_string(),
            room: Some(self.room.clone()),
            color: Some(color.as_str().to_string()),
            available_moves: Some(available),
            ..Default::default()
        };
        self.send_message(ctx, &reply);
    }

    fn handle_abort(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let bridge = match self.bridge.as_mut() {
            Some(bridge) => bridge,
            None => {
                let reply = ServerMessage::error(Some(self.room.clone()), "You are a spectator");
                self.send_message(ctx, &reply);
                return;
            }
        };
        match bridge.abort() {
            Ok(SubmitOutcome::Committed(_)) => self.broadcast_current("terminated"),
            Ok(SubmitOutcome::Superseded) => {}
            Err(e) => {
                let reply = ServerMessage::error(Some(self.room.clone()), e.to_string());
                self.send_message(ctx, &reply);
            }
        }
    }

    fn handle_rematch(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let rematch = match self.bridge.as_mut() {
            Some(bridge) => bridge.rematch(),
            None => {
                let reply = ServerMessage::error(Some(self.room.clone()), "You are a spectator");
                self.send_message(ctx, &reply);
                return;
            }
        };
        match rematch {
            Ok(SubmitOutcome::Committed(_)) => {
                let both_seated = {
                    let seats = self.app_state.seats.lock().unwrap();
                    seats
                        .get(&self.room)
                        .map(|s| s.white.is_some() && s.black.is_some())
                        .unwrap_or(false)
                };
                if both_seated {
                    match self.bridge.as_mut().map(|bridge| bridge.start_match()) {
                        Some(Ok(SubmitOutcome::Committed(_))) => {
                            self.broadcast_current("match_started")
                        }
                        _ => self.broadcast_current("rematch"),
                    }
                } else {
                    self.broadcast_current("rematch");
                }
            }
            Ok(SubmitOutcome::Superseded) => {}
            Err(e) => {
                let reply = ServerMessage::error(Some(self.room.clone()), e.to_string());
                self.send_message(ctx, &reply);
            }
        }
    }

    fn handle_time_sync(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.room.is_empty() {
            let reply = ServerMessage::error(None, "Not in a room");
            self.send_message(ctx, &reply);
            return;
        }
        if let Some(snapshot) = self.app_state.store.read(&self.room) {
            let reply = self.state_message("time_sync", &snapshot);
            self.send_message(ctx, &reply);
        }
    }
}

// WebSocket connection handler
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let id = Uuid::new_v4().to_string();
    info!("New WebSocket connection: {}", id);

    let session = MatchSocket {
        id,
        app_state: app_state.clone(),
        room: String::new(),
        color: None,
        bridge: None,
        ticker: None,
    };

    ws::start(session, &req, stream)
}
