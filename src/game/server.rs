//! Room scheduler: a single task that owns every room, applies client
//! commands between ticks and steps all rooms at the fixed tick rate.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::util::time::tick_period;
use crate::ws::protocol::{ClientMsg, InitPayload, JoinRequest, ServerMsg};

use super::entity::Team;
use super::pitch::FIELD;
use super::registry::RoomRegistry;
use super::room::MATCH_DURATION;
use super::ConnId;

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Commands sent from connection tasks to the scheduler
#[derive(Debug)]
pub enum Command {
    Connect {
        conn: ConnId,
        outbox: mpsc::Sender<Outbound>,
    },
    Client {
        conn: ConnId,
        msg: ClientMsg,
    },
    Disconnect {
        conn: ConnId,
    },
}

/// What the scheduler pushes to one connection
#[derive(Debug)]
pub enum Outbound {
    /// Direct reply (init / join_error)
    Msg(ServerMsg),
    /// Switch to this room's state frames
    Subscribe(broadcast::Receiver<ServerMsg>),
}

/// Counters refreshed every tick, read by the health endpoint
#[derive(Debug, Default)]
pub struct ServerStats {
    pub rooms: AtomicUsize,
    pub players: AtomicUsize,
    pub spectators: AtomicUsize,
}

/// Cloneable handle used by connection tasks
#[derive(Clone)]
pub struct GameServerHandle {
    cmd_tx: mpsc::Sender<Command>,
    stats: Arc<ServerStats>,
}

impl GameServerHandle {
    pub async fn connect(&self, conn: ConnId, outbox: mpsc::Sender<Outbound>) -> bool {
        self.cmd_tx
            .send(Command::Connect { conn, outbox })
            .await
            .is_ok()
    }

    pub async fn send(&self, conn: ConnId, msg: ClientMsg) -> bool {
        self.cmd_tx.send(Command::Client { conn, msg }).await.is_ok()
    }

    pub async fn disconnect(&self, conn: ConnId) {
        let _ = self.cmd_tx.send(Command::Disconnect { conn }).await;
    }

    pub fn active_rooms(&self) -> usize {
        self.stats.rooms.load(Ordering::Relaxed)
    }

    pub fn seated_players(&self) -> usize {
        self.stats.players.load(Ordering::Relaxed)
    }

    pub fn spectators(&self) -> usize {
        self.stats.spectators.load(Ordering::Relaxed)
    }
}

/// The authoritative simulation for every room in the process
pub struct GameServer {
    registry: RoomRegistry,
    cmd_rx: mpsc::Receiver<Command>,
    outboxes: HashMap<ConnId, mpsc::Sender<Outbound>>,
    stats: Arc<ServerStats>,
}

impl GameServer {
    pub fn new(max_step_dt: f32) -> (Self, GameServerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let stats = Arc::new(ServerStats::default());

        let handle = GameServerHandle {
            cmd_tx,
            stats: stats.clone(),
        };

        let server = Self {
            registry: RoomRegistry::new(max_step_dt),
            cmd_rx,
            outboxes: HashMap::new(),
            stats,
        };

        (server, handle)
    }

    /// Run the fixed-rate loop until every handle is dropped
    pub async fn run(mut self) {
        info!(tick_micros = tick_period().as_micros() as u64, "Room scheduler started");

        let mut ticker = interval(tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd, Instant::now()),
                    None => break,
                },
            }
        }

        info!("Room scheduler stopped");
    }

    /// Apply one command immediately; inputs simply overwrite the latest intent
    pub fn handle(&mut self, cmd: Command, now: Instant) {
        match cmd {
            Command::Connect { conn, outbox } => {
                self.outboxes.insert(conn, outbox);
            }
            Command::Client { conn, msg } => self.handle_client(conn, msg, now),
            Command::Disconnect { conn } => {
                self.leave_room(conn);
                self.outboxes.remove(&conn);
                debug!(conn_id = %conn, "Connection closed");
            }
        }
    }

    fn handle_client(&mut self, conn: ConnId, msg: ClientMsg, now: Instant) {
        match msg {
            ClientMsg::JoinRoom(req) => self.handle_join(conn, req, now),
            ClientMsg::Input(frame) => {
                if let Some(entry) = self.registry.room_for_conn_mut(conn) {
                    entry.room.set_input(conn, frame.into());
                }
            }
            ClientMsg::SetSupport { team } => {
                let team = team.as_ref().and_then(Value::as_str).and_then(Team::from_token);
                if let (Some(team), Some(entry)) = (team, self.registry.room_for_conn_mut(conn)) {
                    entry.room.set_support(conn, team);
                }
            }
            ClientMsg::Restart => {
                if let Some(entry) = self.registry.room_for_conn_mut(conn) {
                    entry.room.restart(now);
                }
            }
        }
    }

    fn handle_join(&mut self, conn: ConnId, req: JoinRequest, now: Instant) {
        let (room_id, name) = match req.validate() {
            Ok(valid) => valid,
            Err(e) => {
                debug!(conn_id = %conn, error = %e, "Join rejected");
                self.send(
                    conn,
                    Outbound::Msg(ServerMsg::JoinError {
                        message: e.to_string(),
                    }),
                );
                return;
            }
        };

        if self.registry.room_of(conn).is_some_and(|current| current != room_id) {
            self.leave_room(conn);
        }

        let entry = self.registry.get_or_create(&room_id, now);
        let seat = entry.room.join(conn, name.clone(), now);
        let state_rx = entry.state_tx.subscribe();
        let phase = entry.room.phase();
        self.registry.bind(conn, &room_id);
        debug!(room_id = %room_id, conn_id = %conn, phase = ?phase, "Join handled");

        let init = InitPayload {
            id: conn,
            team: seat.team,
            role: seat.role,
            name,
            room_id,
            field: FIELD,
            match_duration: MATCH_DURATION,
        };
        self.send(conn, Outbound::Msg(ServerMsg::Init(init)));
        self.send(conn, Outbound::Subscribe(state_rx));
    }

    /// Remove a connection from its room, dropping the room once empty
    fn leave_room(&mut self, conn: ConnId) {
        let Some(room_id) = self.registry.unbind(conn) else {
            return;
        };
        let Some(entry) = self.registry.get_mut(&room_id) else {
            return;
        };
        entry.room.leave(conn);
        if entry.room.is_empty() {
            if let Err(e) = self.registry.remove_room(&room_id) {
                warn!(room_id = %room_id, error = %e, "Failed to remove room");
            }
        }
    }

    fn send(&self, conn: ConnId, out: Outbound) {
        if let Some(outbox) = self.outboxes.get(&conn) {
            if outbox.try_send(out).is_err() {
                debug!(conn_id = %conn, "Outbox full or closed, dropping message");
            }
        }
    }

    /// Step every room once and broadcast its state. A room that panics is
    /// evicted so the rest keep running.
    pub fn tick(&mut self, now: Instant) {
        for room_id in self.registry.room_ids() {
            let Some(entry) = self.registry.get_mut(&room_id) else {
                continue;
            };

            let room = &mut entry.room;
            let stepped = catch_unwind(AssertUnwindSafe(|| {
                room.step(now);
                room.snapshot()
            }));

            match stepped {
                Ok(snapshot) => {
                    // No receivers is fine, frames are not retried
                    let _ = entry.state_tx.send(ServerMsg::State(snapshot));
                }
                Err(_) => {
                    error!(room_id = %room_id, "Room step panicked, evicting room");
                    self.registry.evict(&room_id);
                }
            }
        }

        let players = self.registry.iter().map(|e| e.room.seated_count()).sum();
        let spectators = self.registry.iter().map(|e| e.room.spectator_count()).sum();
        self.stats.rooms.store(self.registry.room_count(), Ordering::Relaxed);
        self.stats.players.store(players, Ordering::Relaxed);
        self.stats.spectators.store(spectators, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{Role, SeatTeam};
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn connect(server: &mut GameServer, now: Instant) -> (ConnId, mpsc::Receiver<Outbound>) {
        let conn = Uuid::new_v4();
        let (outbox, rx) = mpsc::channel(16);
        server.handle(Command::Connect { conn, outbox }, now);
        (conn, rx)
    }

    fn join(server: &mut GameServer, conn: ConnId, room: &str, name: &str, now: Instant) {
        let msg = ClientMsg::JoinRoom(JoinRequest::new(room, name));
        server.handle(Command::Client { conn, msg }, now);
    }

    fn expect_init(
        rx: &mut mpsc::Receiver<Outbound>,
    ) -> (InitPayload, broadcast::Receiver<ServerMsg>) {
        let init = match rx.try_recv() {
            Ok(Outbound::Msg(ServerMsg::Init(init))) => init,
            other => panic!("expected init, got {:?}", other),
        };
        let state_rx = match rx.try_recv() {
            Ok(Outbound::Subscribe(state_rx)) => state_rx,
            other => panic!("expected subscription, got {:?}", other),
        };
        (init, state_rx)
    }

    #[test]
    fn invalid_join_reports_error_without_creating_room() {
        let now = Instant::now();
        let (mut server, _handle) = GameServer::new(0.25);
        let (conn, mut rx) = connect(&mut server, now);

        join(&mut server, conn, "", "A", now);
        match rx.try_recv() {
            Ok(Outbound::Msg(ServerMsg::JoinError { message })) => {
                assert_eq!(message, "Invalid room ID.")
            }
            other => panic!("expected join_error, got {:?}", other),
        }

        join(&mut server, conn, "123", "", now);
        match rx.try_recv() {
            Ok(Outbound::Msg(ServerMsg::JoinError { message })) => {
                assert_eq!(message, "Please enter your name.")
            }
            other => panic!("expected join_error, got {:?}", other),
        }
        assert_eq!(server.registry().room_count(), 0);
    }

    #[test]
    fn three_joins_fill_seats_then_spectate() {
        let now = Instant::now();
        let (mut server, handle) = GameServer::new(0.25);
        let (a, mut rx_a) = connect(&mut server, now);
        let (b, mut rx_b) = connect(&mut server, now);
        let (c, mut rx_c) = connect(&mut server, now);

        join(&mut server, a, "123", "A", now);
        join(&mut server, b, "123", "B", now);
        join(&mut server, c, "123", "C", now);

        let (init_a, _) = expect_init(&mut rx_a);
        let (init_b, _) = expect_init(&mut rx_b);
        let (init_c, mut state_c) = expect_init(&mut rx_c);

        assert_eq!((init_a.role, init_a.team), (Role::Player, SeatTeam::Blue));
        assert_eq!((init_b.role, init_b.team), (Role::Player, SeatTeam::Red));
        assert_eq!((init_c.role, init_c.team), (Role::Spectator, SeatTeam::Spectator));
        assert_eq!(init_c.room_id, "123");
        assert_eq!(init_c.match_duration, MATCH_DURATION);

        server.tick(now + Duration::from_millis(16));
        match state_c.try_recv() {
            Ok(ServerMsg::State(state)) => {
                assert!(state.running);
                assert_eq!(state.players.len(), 2);
                assert_eq!(state.event_id, 1);
            }
            other => panic!("expected state, got {:?}", other),
        }

        assert_eq!(handle.active_rooms(), 1);
        assert_eq!(handle.seated_players(), 2);
        assert_eq!(handle.spectators(), 1);
    }

    #[test]
    fn last_disconnect_removes_room() {
        let now = Instant::now();
        let (mut server, _handle) = GameServer::new(0.25);
        let (a, _rx_a) = connect(&mut server, now);
        let (b, _rx_b) = connect(&mut server, now);
        join(&mut server, a, "r", "A", now);
        join(&mut server, b, "r", "B", now);

        server.handle(Command::Disconnect { conn: a }, now);
        let room = &server.registry().get("r").unwrap().room;
        assert!(!room.running);
        assert_eq!(room.seated_count(), 1);

        server.handle(Command::Disconnect { conn: b }, now);
        assert!(server.registry().get("r").is_none());
    }

    #[test]
    fn commands_from_unjoined_connections_are_ignored() {
        let now = Instant::now();
        let (mut server, _handle) = GameServer::new(0.25);
        let (conn, mut rx) = connect(&mut server, now);

        let input: ClientMsg =
            serde_json::from_value(json!({"type": "input", "up": true})).unwrap();
        server.handle(Command::Client { conn, msg: input }, now);
        server.handle(Command::Client { conn, msg: ClientMsg::Restart }, now);
        let stranger = Uuid::new_v4();
        server.handle(Command::Disconnect { conn: stranger }, now);

        assert!(rx.try_recv().is_err());
        assert_eq!(server.registry().room_count(), 0);
    }

    #[test]
    fn support_needs_valid_team_token() {
        let now = Instant::now();
        let (mut server, _handle) = GameServer::new(0.25);
        let conns: Vec<_> = (0..3).map(|_| connect(&mut server, now)).collect();
        for (i, (conn, _)) in conns.iter().enumerate() {
            join(&mut server, *conn, "r", &format!("p{}", i), now);
        }
        let conn = conns[2].0;

        let msg = ClientMsg::SetSupport {
            team: Some(json!("green")),
        };
        server.handle(Command::Client { conn, msg }, now);
        let room = &server.registry().get("r").unwrap().room;
        assert_eq!(room.snapshot().supporters.blue + room.snapshot().supporters.red, 0);

        let msg = ClientMsg::SetSupport {
            team: Some(json!("blue")),
        };
        server.handle(Command::Client { conn, msg }, now);
        let room = &server.registry().get("r").unwrap().room;
        assert_eq!(room.snapshot().supporters.blue, 1);
    }

    #[test]
    fn joining_another_room_leaves_the_first() {
        let now = Instant::now();
        let (mut server, _handle) = GameServer::new(0.25);
        let (conn, _rx) = connect(&mut server, now);

        join(&mut server, conn, "one", "A", now);
        join(&mut server, conn, "two", "A", now);

        assert!(server.registry().get("one").is_none());
        assert_eq!(server.registry().room_of(conn), Some("two"));
    }

    #[tokio::test]
    async fn scheduler_task_broadcasts_state() {
        let (server, handle) = GameServer::new(0.25);
        tokio::spawn(server.run());

        let conn = Uuid::new_v4();
        let (outbox, mut rx) = mpsc::channel(16);
        assert!(handle.connect(conn, outbox).await);
        assert!(handle.send(conn, ClientMsg::JoinRoom(JoinRequest::new("live", "A"))).await);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(matches!(first, Some(Outbound::Msg(ServerMsg::Init(_)))));
        let Some(Outbound::Subscribe(mut state_rx)) = rx.recv().await else {
            panic!("expected subscription");
        };

        let frame = tokio::time::timeout(Duration::from_secs(1), state_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match frame {
            ServerMsg::State(state) => {
                assert!(!state.running);
                assert_eq!(state.players.len(), 1);
            }
            other => panic!("expected state, got {:?}", other),
        }

        handle.disconnect(conn).await;
    }
}
