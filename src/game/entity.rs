//! Player, spectator and ball records owned by a room

use std::time::Instant;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::pitch::{center_spot, kickoff_x, FIELD_HEIGHT};
use super::ConnId;

/// One of the two sides of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Blue,
    Red,
}

impl Team {
    /// Parse the wire token used by clients ("blue" / "red")
    pub fn from_token(token: &str) -> Option<Team> {
        match token {
            "blue" => Some(Team::Blue),
            "red" => Some(Team::Red),
            _ => None,
        }
    }
}

/// Latest input intent of a seated player (last write wins)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub kick: bool,
    pub sprint: bool,
    pub bump: bool,
}

impl InputState {
    /// Unit movement intent from the directional keys (zero when idle)
    pub fn direction(&self) -> Vec2 {
        let mut dir = Vec2::ZERO;
        if self.up {
            dir.y -= 1.0;
        }
        if self.down {
            dir.y += 1.0;
        }
        if self.left {
            dir.x -= 1.0;
        }
        if self.right {
            dir.x += 1.0;
        }
        dir.normalize_or_zero()
    }
}

/// A seated player (authoritative)
#[derive(Debug, Clone)]
pub struct Player {
    pub id: ConnId,
    pub name: String,
    pub team: Team,

    pub pos: Vec2,
    pub vel: Vec2,

    pub input: InputState,
    pub last_kick: Option<Instant>,
    pub sprint_energy: f32,
    pub bump_cooldown: f32,
}

impl Player {
    /// New player standing on its own side of the centre line
    pub fn new(id: ConnId, name: String, team: Team, second_half: bool) -> Self {
        Self {
            id,
            name,
            team,
            pos: Vec2::new(kickoff_x(team, second_half), FIELD_HEIGHT / 2.0),
            vel: Vec2::ZERO,
            input: InputState::default(),
            last_kick: None,
            sprint_energy: 1.0,
            bump_cooldown: 0.0,
        }
    }
}

/// A connection watching the match without a seat
#[derive(Debug, Clone)]
pub struct Spectator {
    pub name: String,
    pub support_team: Option<Team>,
}

impl Spectator {
    pub fn new(name: String) -> Self {
        Self {
            name,
            support_team: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub pos: Vec2,
    pub vel: Vec2,
}

impl Ball {
    /// Put the ball back on the centre spot at rest
    pub fn reset(&mut self) {
        self.pos = center_spot();
        self.vel = Vec2::ZERO;
    }
}

impl Default for Ball {
    fn default() -> Self {
        Self {
            pos: center_spot(),
            vel: Vec2::ZERO,
        }
    }
}
