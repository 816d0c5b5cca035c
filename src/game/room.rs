//! Room state and the match state machine

use std::collections::HashMap;
use std::time::{Duration, Instant};

use glam::Vec2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::util::time::elapsed_secs;
use crate::ws::protocol::{EventRecord, MatchEvent, Role, Score, SeatTeam, StateSnapshot};

use super::entity::{Ball, InputState, Player, Spectator, Team};
use super::physics;
use super::pitch::{kickoff_x, FIELD_HEIGHT, FORMATION_SPACING};
use super::snapshot::SnapshotBuilder;
use super::ConnId;

/// Match length in seconds
pub const MATCH_DURATION: f32 = 180.0;
pub const HALF_TIME: f32 = MATCH_DURATION / 2.0;

pub const HALFTIME_PAUSE: Duration = Duration::from_secs(4);
pub const GOAL_PAUSE: Duration = Duration::from_secs(3);

/// Seats per room; everyone after that spectates
pub const MAX_PLAYERS: usize = 2;

/// Match phase, derived from the room flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Fewer than two seated players, clock frozen
    Idle,
    FirstHalf,
    /// Fixed pause after the first half, sides already swapped
    HalftimePause,
    SecondHalf,
    /// Short pause after a goal
    GoalPause,
    /// Match over until someone restarts
    Fulltime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseReason {
    Halftime,
    Goal,
}

/// Play resumes at `at` unless the room changed underneath
#[derive(Debug, Clone, Copy)]
struct PendingResume {
    at: Instant,
    reason: PauseReason,
}

/// Where a joining connection ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    pub role: Role,
    pub team: SeatTeam,
}

/// One isolated match and everyone connected to it
pub struct Room {
    pub id: String,
    /// Seated players in seat order
    players: Vec<Player>,
    spectators: HashMap<ConnId, Spectator>,
    pub ball: Ball,
    pub score: Score,
    pub match_time: f32,
    pub running: bool,
    halftime_triggered: bool,
    second_half: bool,
    last_event: Option<EventRecord>,
    event_id: u64,
    last_tick: Instant,
    resume: Option<PendingResume>,
    max_step_dt: f32,
    rng: ChaCha8Rng,
}

impl Room {
    pub fn new(id: String, now: Instant, max_step_dt: f32) -> Self {
        Self::with_rng(id, now, max_step_dt, ChaCha8Rng::from_entropy())
    }

    /// Room with a fixed kick-jitter seed
    #[cfg(test)]
    pub fn with_seed(id: String, now: Instant, max_step_dt: f32, seed: u64) -> Self {
        Self::with_rng(id, now, max_step_dt, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(id: String, now: Instant, max_step_dt: f32, rng: ChaCha8Rng) -> Self {
        Self {
            id,
            players: Vec::with_capacity(MAX_PLAYERS),
            spectators: HashMap::new(),
            ball: Ball::default(),
            score: Score::default(),
            match_time: MATCH_DURATION,
            running: false,
            halftime_triggered: false,
            second_half: false,
            last_event: None,
            event_id: 0,
            last_tick: now,
            resume: None,
            max_step_dt,
            rng,
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn spectators(&self) -> impl Iterator<Item = &Spectator> {
        self.spectators.values()
    }

    pub fn seated_count(&self) -> usize {
        self.players.len()
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.spectators.is_empty()
    }

    #[cfg(test)]
    pub fn second_half(&self) -> bool {
        self.second_half
    }

    pub fn last_event(&self) -> Option<EventRecord> {
        self.last_event
    }

    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    pub fn phase(&self) -> MatchPhase {
        if self.players.len() < MAX_PLAYERS {
            return MatchPhase::Idle;
        }
        if self.running {
            return if self.second_half {
                MatchPhase::SecondHalf
            } else {
                MatchPhase::FirstHalf
            };
        }
        match self.resume.map(|r| r.reason) {
            Some(PauseReason::Halftime) => MatchPhase::HalftimePause,
            Some(PauseReason::Goal) => MatchPhase::GoalPause,
            None if self.match_time <= 0.0 => MatchPhase::Fulltime,
            None => MatchPhase::Idle,
        }
    }

    /// Current seat of a connection, if it is in this room
    pub fn seat_of(&self, conn: ConnId) -> Option<Seat> {
        if let Some(player) = self.players.iter().find(|p| p.id == conn) {
            return Some(Seat {
                role: Role::Player,
                team: player.team.into(),
            });
        }
        self.spectators.contains_key(&conn).then_some(Seat {
            role: Role::Spectator,
            team: SeatTeam::Spectator,
        })
    }

    /// Seat a connection, or make it a spectator when both seats are taken.
    /// The second seated player kicks the match off.
    pub fn join(&mut self, conn: ConnId, name: String, now: Instant) -> Seat {
        if let Some(seat) = self.seat_of(conn) {
            return seat;
        }

        if self.players.len() >= MAX_PLAYERS {
            info!(room_id = %self.id, conn_id = %conn, name = %name, "Spectator joined");
            self.spectators.insert(conn, Spectator::new(name));
            return Seat {
                role: Role::Spectator,
                team: SeatTeam::Spectator,
            };
        }

        let team = if self.players.iter().any(|p| p.team == Team::Blue) {
            Team::Red
        } else {
            Team::Blue
        };
        info!(room_id = %self.id, conn_id = %conn, name = %name, team = ?team, "Player seated");
        self.players.push(Player::new(conn, name, team, self.second_half));

        if self.players.len() == MAX_PLAYERS && !self.running {
            self.reset_match(now);
        }

        Seat {
            role: Role::Player,
            team: team.into(),
        }
    }

    /// Drop a connection from the room. Losing a seat stops the match and
    /// returns the clock to idle; the score is kept until the next kickoff.
    pub fn leave(&mut self, conn: ConnId) -> bool {
        let name = if let Some(idx) = self.players.iter().position(|p| p.id == conn) {
            self.players.remove(idx).name
        } else if let Some(spectator) = self.spectators.remove(&conn) {
            spectator.name
        } else {
            return false;
        };

        if self.players.len() < MAX_PLAYERS {
            self.running = false;
            self.match_time = MATCH_DURATION;
            self.halftime_triggered = false;
            self.second_half = false;
            self.resume = None;
        }

        info!(
            room_id = %self.id,
            conn_id = %conn,
            name = %name,
            players = self.players.len(),
            spectators = self.spectators.len(),
            "Left room"
        );
        true
    }

    /// Overwrite a seated player's input. Spectators are ignored.
    pub fn set_input(&mut self, conn: ConnId, input: InputState) -> bool {
        match self.players.iter_mut().find(|p| p.id == conn) {
            Some(player) => {
                player.input = input;
                true
            }
            None => false,
        }
    }

    /// Record which side a spectator supports. Players are ignored.
    pub fn set_support(&mut self, conn: ConnId, team: Team) -> bool {
        match self.spectators.get_mut(&conn) {
            Some(spectator) => {
                spectator.support_team = Some(team);
                true
            }
            None => false,
        }
    }

    /// Restart from kickoff; needs both seats filled
    pub fn restart(&mut self, now: Instant) -> bool {
        if self.players.len() < MAX_PLAYERS {
            debug!(room_id = %self.id, "Restart ignored, not enough players");
            return false;
        }
        self.reset_match(now);
        true
    }

    fn reset_match(&mut self, now: Instant) {
        self.score = Score::default();
        self.match_time = MATCH_DURATION;
        self.running = true;
        self.halftime_triggered = false;
        self.second_half = false;
        self.last_event = None;
        self.event_id = 0;
        self.last_tick = now;
        self.resume = None;
        self.reset_formation();
        self.ball.reset();
        self.emit(MatchEvent::Kickoff);
        info!(room_id = %self.id, "Kickoff");
    }

    fn emit(&mut self, event: MatchEvent) -> EventRecord {
        self.event_id += 1;
        let record = EventRecord {
            id: self.event_id,
            event,
        };
        self.last_event = Some(record);
        record
    }

    /// Line both teams up on their own half, team mates stacked vertically
    fn reset_formation(&mut self) {
        for team in [Team::Blue, Team::Red] {
            let count = self.players.iter().filter(|p| p.team == team).count();
            let x = kickoff_x(team, self.second_half);
            let mid = (count as f32 - 1.0) / 2.0;

            for (idx, player) in self
                .players
                .iter_mut()
                .filter(|p| p.team == team)
                .enumerate()
            {
                let y = FIELD_HEIGHT / 2.0 + (idx as f32 - mid) * FORMATION_SPACING;
                player.pos = Vec2::new(x, y);
                player.vel = Vec2::ZERO;
            }
        }
    }

    fn pause_until(&mut self, at: Instant, reason: PauseReason) {
        self.running = false;
        self.resume = Some(PendingResume { at, reason });
    }

    /// Resume a timed pause once due, if the match can still go on
    fn poll_resume(&mut self, now: Instant) {
        let Some(pending) = self.resume else {
            return;
        };
        if now < pending.at {
            return;
        }
        self.resume = None;
        if self.match_time > 0.0 && self.players.len() == MAX_PLAYERS {
            self.running = true;
            debug!(room_id = %self.id, reason = ?pending.reason, "Play resumed");
        }
    }

    /// Advance the room by the wall-clock time since its previous step.
    /// Returns the events emitted during the step, oldest first.
    pub fn step(&mut self, now: Instant) -> Vec<EventRecord> {
        let dt = elapsed_secs(self.last_tick, now).min(self.max_step_dt);
        self.last_tick = now;

        let mut emitted = Vec::new();
        self.poll_resume(now);
        if !self.running {
            return emitted;
        }

        let prev_time = self.match_time;
        self.match_time -= dt;
        let mut period_over = false;

        if !self.halftime_triggered && prev_time > HALF_TIME && self.match_time <= HALF_TIME {
            self.match_time = HALF_TIME;
            self.halftime_triggered = true;
            self.second_half = true;
            emitted.push(self.emit(MatchEvent::Halftime));
            self.reset_formation();
            self.ball.reset();
            self.pause_until(now + HALFTIME_PAUSE, PauseReason::Halftime);
            period_over = true;
            info!(room_id = %self.id, blue = self.score.blue, red = self.score.red, "Halftime");
        }

        if self.match_time <= 0.0 {
            self.match_time = 0.0;
            self.running = false;
            self.resume = None;
            let winner = self.score.winner();
            emitted.push(self.emit(MatchEvent::Fulltime { winner }));
            self.reset_formation();
            self.ball.reset();
            period_over = true;
            info!(room_id = %self.id, winner = ?winner, "Fulltime");
        }

        if period_over {
            return emitted;
        }

        let mut events = Vec::new();
        physics::update_players(
            &mut self.players,
            &mut self.ball,
            self.second_half,
            dt,
            now,
            &mut self.rng,
            &mut events,
        );
        for event in events {
            emitted.push(self.emit(event));
        }

        if let Some(team) = physics::update_ball(&mut self.ball, &self.players, self.second_half) {
            self.score.credit(team);
            emitted.push(self.emit(MatchEvent::Goal { team }));
            self.reset_formation();
            self.ball.reset();
            self.pause_until(now + GOAL_PAUSE, PauseReason::Goal);
            info!(
                room_id = %self.id,
                team = ?team,
                blue = self.score.blue,
                red = self.score.red,
                "Goal"
            );
        }

        emitted
    }

    /// Public state for broadcast
    pub fn snapshot(&self) -> StateSnapshot {
        SnapshotBuilder::build(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::pitch::center_spot;
    use crate::ws::protocol::Winner;
    use uuid::Uuid;

    const MAX_DT: f32 = 0.25;

    fn at(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    fn seat(role: Role, team: SeatTeam) -> Seat {
        Seat { role, team }
    }

    fn record(id: u64, event: MatchEvent) -> Option<EventRecord> {
        Some(EventRecord { id, event })
    }

    /// Room with two seated players, match running from `t0`
    fn running_room(t0: Instant) -> (Room, ConnId, ConnId) {
        let mut room = Room::with_seed("123".into(), t0, MAX_DT, 1);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        room.join(a, "A".into(), t0);
        room.join(b, "B".into(), t0);
        (room, a, b)
    }

    #[test]
    fn join_order_assigns_teams_then_spectators() {
        let t0 = Instant::now();
        let mut room = Room::with_seed("123".into(), t0, MAX_DT, 1);

        let a = room.join(Uuid::new_v4(), "A".into(), t0);
        assert_eq!(a, seat(Role::Player, SeatTeam::Blue));
        assert!(!room.running);
        assert_eq!(room.phase(), MatchPhase::Idle);

        let b = room.join(Uuid::new_v4(), "B".into(), t0);
        assert_eq!(b, seat(Role::Player, SeatTeam::Red));

        let c = room.join(Uuid::new_v4(), "C".into(), t0);
        assert_eq!(c, seat(Role::Spectator, SeatTeam::Spectator));

        assert_eq!(room.seated_count(), 2);
        assert_eq!(room.spectator_count(), 1);
    }

    #[test]
    fn second_seat_kicks_off() {
        let t0 = Instant::now();
        let (room, _, _) = running_room(t0);

        assert!(room.running);
        assert_eq!(room.phase(), MatchPhase::FirstHalf);
        assert_eq!(room.score, Score::default());
        assert_eq!(room.match_time, MATCH_DURATION);
        assert_eq!(room.event_id(), 1);
        assert_eq!(room.last_event(), record(1, MatchEvent::Kickoff));

        let blue = &room.players()[0];
        let red = &room.players()[1];
        assert_eq!(blue.pos, Vec2::new(340.0, 225.0));
        assert_eq!(red.pos, Vec2::new(460.0, 225.0));
        assert_eq!(room.ball.pos, center_spot());
    }

    #[test]
    fn clock_counts_down_while_running() {
        let t0 = Instant::now();
        let (mut room, _, _) = running_room(t0);

        room.step(at(t0, 100));
        assert!((room.match_time - (MATCH_DURATION - 0.1)).abs() < 1e-3);
    }

    #[test]
    fn step_delta_is_clamped() {
        let t0 = Instant::now();
        let (mut room, _, _) = running_room(t0);

        room.step(at(t0, 10_000));
        assert!((room.match_time - (MATCH_DURATION - MAX_DT)).abs() < 1e-3);
    }

    #[test]
    fn halftime_fires_once_and_resumes_after_pause() {
        let t0 = Instant::now();
        let (mut room, _, _) = running_room(t0);
        room.match_time = HALF_TIME + 0.01;

        room.step(at(t0, 20));
        assert_eq!(room.match_time, HALF_TIME);
        assert!(room.second_half());
        assert!(!room.running);
        assert_eq!(room.phase(), MatchPhase::HalftimePause);
        assert_eq!(room.last_event(), record(2, MatchEvent::Halftime));
        // Sides swapped
        assert_eq!(room.players()[0].pos.x, 460.0);
        assert_eq!(room.players()[1].pos.x, 340.0);

        room.step(at(t0, 2_000));
        assert!(!room.running);
        assert_eq!(room.match_time, HALF_TIME);

        room.step(at(t0, 4_100));
        assert!(room.running);
        assert_eq!(room.phase(), MatchPhase::SecondHalf);

        for ms in (4_200..6_000).step_by(100) {
            room.step(at(t0, ms));
        }
        assert!(room.second_half());
        assert_eq!(room.event_id(), 2);
        assert!(room.match_time < HALF_TIME);
    }

    #[test]
    fn fulltime_clamps_clock_and_names_winner() {
        let t0 = Instant::now();
        let (mut room, _, _) = running_room(t0);
        room.halftime_triggered = true;
        room.second_half = true;
        room.match_time = 0.01;
        room.score = Score { blue: 2, red: 1 };

        room.step(at(t0, 20));
        assert_eq!(room.match_time, 0.0);
        assert!(!room.running);
        assert_eq!(room.phase(), MatchPhase::Fulltime);
        let winner = Winner::Blue;
        assert_eq!(room.last_event(), record(2, MatchEvent::Fulltime { winner }));

        room.step(at(t0, 5_000));
        assert_eq!(room.event_id(), 2);
        assert!(!room.running);
    }

    #[test]
    fn drawn_match() {
        let t0 = Instant::now();
        let (mut room, _, _) = running_room(t0);
        room.halftime_triggered = true;
        room.match_time = 0.01;
        room.score = Score { blue: 1, red: 1 };

        room.step(at(t0, 20));
        let winner = Winner::Draw;
        assert_eq!(
            room.last_event().map(|e| e.event),
            Some(MatchEvent::Fulltime { winner })
        );
    }

    #[test]
    fn goal_on_left_credits_red_then_pauses() {
        let t0 = Instant::now();
        let (mut room, _, _) = running_room(t0);
        room.ball.pos = Vec2::new(10.0, 225.0);
        room.ball.vel = Vec2::new(-5.0, 0.0);

        room.step(at(t0, 16));
        assert_eq!(room.score, Score { blue: 0, red: 1 });
        let team = Team::Red;
        assert_eq!(room.last_event(), record(2, MatchEvent::Goal { team }));
        assert_eq!(room.ball.pos, center_spot());
        assert_eq!(room.ball.vel, Vec2::ZERO);
        assert_eq!(room.players()[0].pos, Vec2::new(340.0, 225.0));
        assert!(!room.running);
        assert_eq!(room.phase(), MatchPhase::GoalPause);

        let frozen = room.match_time;
        room.step(at(t0, 1_000));
        assert!(!room.running);
        assert_eq!(room.match_time, frozen);

        room.step(at(t0, 3_100));
        assert!(room.running);
    }

    #[test]
    fn losing_a_player_idles_but_keeps_score() {
        let t0 = Instant::now();
        let (mut room, a, _) = running_room(t0);
        room.score = Score { blue: 3, red: 2 };
        room.match_time = 50.0;
        room.second_half = true;
        room.halftime_triggered = true;

        assert!(room.leave(a));
        assert!(!room.running);
        assert_eq!(room.match_time, MATCH_DURATION);
        assert!(!room.second_half());
        assert_eq!(room.score, Score { blue: 3, red: 2 });
        assert_eq!(room.phase(), MatchPhase::Idle);

        // The free seat is blue again, and reseating starts a fresh match
        let seat = room.join(Uuid::new_v4(), "D".into(), at(t0, 500));
        assert_eq!(seat.team, SeatTeam::Blue);
        assert!(room.running);
        assert_eq!(room.score, Score::default());
        assert_eq!(room.event_id(), 1);
    }

    #[test]
    fn pending_resume_does_not_outlive_a_disconnect() {
        let t0 = Instant::now();
        let (mut room, _, b) = running_room(t0);
        room.ball.pos = Vec2::new(790.0, 225.0);
        room.ball.vel = Vec2::new(5.0, 0.0);
        room.step(at(t0, 16));
        assert_eq!(room.phase(), MatchPhase::GoalPause);

        room.leave(b);
        room.step(at(t0, 4_000));
        assert!(!room.running);
        assert_eq!(room.match_time, MATCH_DURATION);
    }

    #[test]
    fn restart_needs_two_players() {
        let t0 = Instant::now();
        let mut room = Room::with_seed("r".into(), t0, MAX_DT, 1);
        room.join(Uuid::new_v4(), "A".into(), t0);
        assert!(!room.restart(t0));
        assert_eq!(room.event_id(), 0);

        room.join(Uuid::new_v4(), "B".into(), t0);
        room.score = Score { blue: 4, red: 0 };
        room.match_time = 30.0;
        room.second_half = true;
        assert!(room.restart(at(t0, 100)));
        assert_eq!(room.score, Score::default());
        assert_eq!(room.match_time, MATCH_DURATION);
        assert!(!room.second_half());
        assert_eq!(room.event_id(), 1);
    }

    #[test]
    fn input_and_support_respect_roles() {
        let t0 = Instant::now();
        let (mut room, a, _) = running_room(t0);
        let c = Uuid::new_v4();
        room.join(c, "C".into(), t0);

        let input = InputState {
            right: true,
            ..Default::default()
        };
        assert!(room.set_input(a, input));
        assert!(!room.set_input(c, input));
        assert!(!room.set_input(Uuid::new_v4(), input));

        assert!(room.set_support(c, Team::Red));
        assert!(!room.set_support(a, Team::Red));
        assert_eq!(room.snapshot().supporters.red, 1);
    }

    #[test]
    fn event_ids_step_by_one() {
        let t0 = Instant::now();
        let (mut room, a, b) = running_room(t0);
        room.players[0].pos = Vec2::new(300.0, 225.0);
        room.players[1].pos = Vec2::new(320.0, 225.0);
        let bump = InputState {
            bump: true,
            ..Default::default()
        };
        room.set_input(a, bump);
        room.set_input(b, bump);

        let mut last = room.event_id();
        let mut busiest = 0;
        for ms in (16..2_000).step_by(16) {
            let emitted = room.step(at(t0, ms));
            for (k, event) in emitted.iter().enumerate() {
                assert_eq!(event.id, last + k as u64 + 1);
            }
            last += emitted.len() as u64;
            assert_eq!(room.event_id(), last);
            assert_eq!(room.last_event().map_or(0, |e| e.id), last);
            busiest = busiest.max(emitted.len());
        }
        // Both players bump on the first tick
        assert!(busiest >= 2);
    }

    #[test]
    fn player_input_moves_the_player() {
        let t0 = Instant::now();
        let (mut room, a, _) = running_room(t0);
        let input = InputState {
            down: true,
            ..Default::default()
        };
        room.set_input(a, input);
        room.step(at(t0, 16));
        assert!(room.players()[0].pos.y > 225.0);
    }

    #[test]
    fn rejoining_connection_keeps_its_seat() {
        let t0 = Instant::now();
        let (mut room, a, _) = running_room(t0);
        let seat = room.join(a, "A".into(), t0);
        assert_eq!(seat.team, SeatTeam::Blue);
        assert_eq!(room.seated_count(), 2);
        assert_eq!(room.spectator_count(), 0);
    }
}
