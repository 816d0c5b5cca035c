//! Pitch geometry and the constants shared with clients

use glam::Vec2;
use serde::Serialize;

use super::entity::Team;

pub const FIELD_WIDTH: f32 = 800.0;
pub const FIELD_HEIGHT: f32 = 450.0;

/// Goal mouth spans this fraction of the field height on both ends
pub const GOAL_TOP: f32 = FIELD_HEIGHT * 0.3;
pub const GOAL_BOTTOM: f32 = FIELD_HEIGHT * 0.7;

pub const PLAYER_RADIUS: f32 = 14.0;
pub const BALL_RADIUS: f32 = 8.0;

/// Horizontal distance from the centre spot to a player's kickoff position
pub const KICKOFF_OFFSET: f32 = 60.0;
/// Vertical spacing between team mates in kickoff formation
pub const FORMATION_SPACING: f32 = 40.0;

/// Field dimensions as reported to clients on join
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Field {
    pub width: f32,
    pub height: f32,
}

pub const FIELD: Field = Field {
    width: FIELD_WIDTH,
    height: FIELD_HEIGHT,
};

pub fn center_spot() -> Vec2 {
    Vec2::new(FIELD_WIDTH / 2.0, FIELD_HEIGHT / 2.0)
}

/// Which goal a team attacks: +1 for the right goal, -1 for the left.
/// Blue attacks right in the first half and the sides swap at halftime.
pub fn attack_direction(team: Team, second_half: bool) -> f32 {
    match (team, second_half) {
        (Team::Blue, false) | (Team::Red, true) => 1.0,
        (Team::Blue, true) | (Team::Red, false) => -1.0,
    }
}

/// Kickoff x coordinate for a team: on its own half, opposite its attack direction
pub fn kickoff_x(team: Team, second_half: bool) -> f32 {
    FIELD_WIDTH / 2.0 - attack_direction(team, second_half) * KICKOFF_OFFSET
}

/// Team credited when the ball enters the goal on the given side
pub fn scorer_for_edge(right_edge: bool, second_half: bool) -> Team {
    if right_edge {
        if second_half { Team::Red } else { Team::Blue }
    } else if second_half {
        Team::Blue
    } else {
        Team::Red
    }
}

pub fn in_goal_mouth(y: f32) -> bool {
    y > GOAL_TOP && y < GOAL_BOTTOM
}
