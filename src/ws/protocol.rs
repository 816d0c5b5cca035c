//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::game::entity::{InputState, Team};
use crate::game::pitch::Field;
use crate::game::{ConnId, JoinError};

/// Messages sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request a seat (or a spectator slot) in a room
    JoinRoom(JoinRequest),

    /// Latest input intent of a seated player
    Input(InputFrame),

    /// Spectator picks a side to cheer for
    SetSupport {
        #[serde(default)]
        team: Option<Value>,
    },

    /// Restart the match from kickoff
    Restart,
}

/// Raw join payload. Fields stay untyped so that bad values are reported
/// as a join error instead of a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub room_id: Option<Value>,
    #[serde(default)]
    pub name: Option<Value>,
}

impl JoinRequest {
    #[cfg(test)]
    pub fn new(room_id: &str, name: &str) -> Self {
        Self {
            room_id: Some(Value::from(room_id)),
            name: Some(Value::from(name)),
        }
    }

    /// Returns `(room_id, name)` when both are non-empty strings
    pub fn validate(&self) -> Result<(String, String), JoinError> {
        let room_id = non_empty_str(&self.room_id).ok_or(JoinError::InvalidRoomId)?;
        let name = non_empty_str(&self.name).ok_or(JoinError::MissingName)?;
        Ok((room_id, name))
    }
}

fn non_empty_str(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Input flags as sent by the client, coerced to booleans
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct InputFrame {
    #[serde(default, deserialize_with = "truthy")]
    pub up: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub down: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub left: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub right: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub kick: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub sprint: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub bump: bool,
}

impl From<InputFrame> for InputState {
    fn from(frame: InputFrame) -> Self {
        Self {
            up: frame.up,
            down: frame.down,
            left: frame.left,
            right: frame.right,
            kick: frame.kick,
            sprint: frame.sprint,
            bump: frame.bump,
        }
    }
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(is_truthy(&value))
}

/// JavaScript truthiness, which browser clients rely on when sending key state
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Join acknowledgment with the assigned seat
    Init(InitPayload),

    /// Join rejected, nothing changed
    JoinError { message: String },

    /// Full room state, sent every tick
    State(StateSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Spectator,
}

/// Team reported at join; spectators have no team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatTeam {
    Blue,
    Red,
    Spectator,
}

impl From<Team> for SeatTeam {
    fn from(team: Team) -> Self {
        match team {
            Team::Blue => SeatTeam::Blue,
            Team::Red => SeatTeam::Red,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub id: ConnId,
    pub team: SeatTeam,
    pub role: Role,
    pub name: String,
    pub room_id: String,
    pub field: Field,
    pub match_duration: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Blue,
    Red,
    Draw,
}

/// Discrete match events driving client-side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    Kickoff,
    Goal { team: Team },
    Halftime,
    Fulltime { winner: Winner },
    Bump { team: Team },
    Kick { team: Team },
}

/// The current event of a room, numbered by the room's event counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub id: u64,
    #[serde(flatten)]
    pub event: MatchEvent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Score {
    pub blue: u32,
    pub red: u32,
}

impl Score {
    pub fn credit(&mut self, team: Team) {
        match team {
            Team::Blue => self.blue += 1,
            Team::Red => self.red += 1,
        }
    }

    pub fn winner(&self) -> Winner {
        if self.blue > self.red {
            Winner::Blue
        } else if self.red > self.blue {
            Winner::Red
        } else {
            Winner::Draw
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Supporters {
    pub blue: u32,
    pub red: u32,
}

/// Player state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub id: ConnId,
    pub name: String,
    pub team: Team,
    pub x: f32,
    pub y: f32,
    /// Sprint energy in [0, 1]
    pub energy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BallSnapshot {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

/// Public room state broadcast once per tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub players: Vec<PlayerSnapshot>,
    pub ball: BallSnapshot,
    pub score: Score,
    pub match_time: f32,
    pub running: bool,
    pub last_event: Option<EventRecord>,
    pub event_id: u64,
    pub supporters: Supporters,
}
