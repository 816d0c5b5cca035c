//! Per-tick physics for players and the ball
//!
//! Movement and ball integration are applied per tick; only the sprint
//! meter and bump cooldown are scaled by the elapsed wall-clock time.

use std::time::{Duration, Instant};

use glam::Vec2;
use rand::Rng;

use crate::ws::protocol::MatchEvent;

use super::entity::{Ball, Player, Team};
use super::pitch::{
    attack_direction, in_goal_mouth, scorer_for_edge, BALL_RADIUS, FIELD_HEIGHT, FIELD_WIDTH,
    PLAYER_RADIUS,
};
use super::collision::{circles_overlap, segment_hits_circle};

/// Acceleration added per tick at full input
pub const PLAYER_SPEED: f32 = 0.9;
pub const PLAYER_FRICTION: f32 = 0.9;

pub const SPRINT_MULTIPLIER: f32 = 1.7;
/// Sprinting needs more than this much energy
pub const SPRINT_MIN_ENERGY: f32 = 0.1;
pub const SPRINT_DRAIN_PER_SEC: f32 = 0.5;
pub const SPRINT_REGEN_PER_SEC: f32 = 0.3;

pub const BUMP_RANGE: f32 = PLAYER_RADIUS * 2.2;
pub const BUMP_IMPULSE: f32 = 5.0;
pub const BUMP_COOLDOWN_SECS: f32 = 1.2;
/// Ball this close to a bumped player gets knocked too
pub const BUMP_BALL_REACH: f32 = PLAYER_RADIUS + BALL_RADIUS + 4.0;
pub const BUMP_BALL_IMPULSE: f32 = 4.0;

pub const KICK_COOLDOWN: Duration = Duration::from_millis(300);
pub const KICK_REACH: f32 = PLAYER_RADIUS + BALL_RADIUS + 8.0;
pub const KICK_POWER: f32 = 6.0;
/// Max lateral jitter added to a kick direction before normalisation
pub const KICK_JITTER: f32 = 0.2;

pub const BALL_FRICTION: f32 = 0.985;
pub const BALL_REST_SPEED: f32 = 0.02;
pub const WALL_RESTITUTION: f32 = 0.8;

/// Base push a player gives the ball on contact
pub const CONTACT_BOOST: f32 = 1.4;
/// Fraction of the player's own speed carried into the ball
pub const CONTACT_CARRY: f32 = 0.25;

/// Below this squared displacement the ball is treated as resting
const RESTING_MOVE_SQ: f32 = 1e-6;

/// Range of player centres that keeps the whole body on the pitch
const PLAYER_MIN: Vec2 = Vec2::splat(PLAYER_RADIUS);
const PLAYER_MAX: Vec2 = Vec2::new(FIELD_WIDTH - PLAYER_RADIUS, FIELD_HEIGHT - PLAYER_RADIUS);

/// Update every seated player: cooldowns, movement, sprint, bump and kick.
/// Players are processed in seat order; events are appended in the order they happen.
pub fn update_players<R: Rng>(
    players: &mut [Player],
    ball: &mut Ball,
    second_half: bool,
    dt: f32,
    now: Instant,
    rng: &mut R,
    events: &mut Vec<MatchEvent>,
) {
    for i in 0..players.len() {
        move_player(&mut players[i], dt);

        if players[i].input.bump && players[i].bump_cooldown <= 0.0 {
            if let Some(team) = try_bump(players, i, ball) {
                events.push(MatchEvent::Bump { team });
            }
        }

        let player = &mut players[i];
        if player.input.kick {
            let ready = player
                .last_kick
                .map_or(true, |last| now.saturating_duration_since(last) >= KICK_COOLDOWN);
            if ready {
                if try_kick(player, ball, second_half, rng) {
                    events.push(MatchEvent::Kick { team: player.team });
                }
                player.last_kick = Some(now);
            }
        }
    }
}

/// Integrate one player's movement and sprint meter
pub fn move_player(player: &mut Player, dt: f32) {
    player.bump_cooldown = (player.bump_cooldown - dt).max(0.0);

    let intent = player.input.direction();
    let sprinting = player.input.sprint && player.sprint_energy > SPRINT_MIN_ENERGY;
    let multiplier = if sprinting { SPRINT_MULTIPLIER } else { 1.0 };

    player.vel += intent * (PLAYER_SPEED * multiplier);

    player.sprint_energy = if sprinting {
        (player.sprint_energy - SPRINT_DRAIN_PER_SEC * dt).max(0.0)
    } else {
        (player.sprint_energy + SPRINT_REGEN_PER_SEC * dt).min(1.0)
    };

    player.vel *= PLAYER_FRICTION;
    player.pos += player.vel;
    player.pos = player.pos.clamp(PLAYER_MIN, PLAYER_MAX);
}

/// Shove the first opponent in range of `players[idx]`.
/// Returns the bumping team when a bump happened.
fn try_bump(players: &mut [Player], idx: usize, ball: &mut Ball) -> Option<Team> {
    let (team, origin) = (players[idx].team, players[idx].pos);

    let target = players.iter().enumerate().position(|(j, other)| {
        if j == idx || other.team == team {
            return false;
        }
        let dist = other.pos.distance(origin);
        dist > 0.0 && dist < BUMP_RANGE
    })?;

    let other = &mut players[target];
    let normal = (other.pos - origin).normalize_or_zero();
    other.vel += normal * BUMP_IMPULSE;

    let to_ball = ball.pos - other.pos;
    if to_ball.length() < BUMP_BALL_REACH {
        ball.vel += to_ball.normalize_or_zero() * BUMP_BALL_IMPULSE;
    }

    players[idx].bump_cooldown = BUMP_COOLDOWN_SECS;
    Some(team)
}

/// Kick the ball toward the goal the player attacks, if it is within reach
pub fn try_kick<R: Rng>(player: &Player, ball: &mut Ball, second_half: bool, rng: &mut R) -> bool {
    if ball.pos.distance(player.pos) > KICK_REACH {
        return false;
    }

    let dir = Vec2::new(
        attack_direction(player.team, second_half),
        rng.gen_range(-KICK_JITTER..KICK_JITTER),
    )
    .normalize_or_zero();

    ball.vel = dir * KICK_POWER;
    true
}

/// Advance the ball one tick. Returns the scoring team if it entered a goal;
/// the caller owns the restart that follows.
pub fn update_ball(ball: &mut Ball, players: &[Player], second_half: bool) -> Option<Team> {
    let start = ball.pos;

    ball.pos += ball.vel;
    ball.vel = damp_ball(ball.vel);

    // Top / bottom walls
    if ball.pos.y < BALL_RADIUS {
        ball.pos.y = BALL_RADIUS;
        ball.vel.y *= -WALL_RESTITUTION;
    }
    if ball.pos.y > FIELD_HEIGHT - BALL_RADIUS {
        ball.pos.y = FIELD_HEIGHT - BALL_RADIUS;
        ball.vel.y *= -WALL_RESTITUTION;
    }

    // Goals / side walls
    if ball.pos.x < BALL_RADIUS {
        if in_goal_mouth(ball.pos.y) {
            return Some(scorer_for_edge(false, second_half));
        }
        ball.pos.x = BALL_RADIUS;
        ball.vel.x *= -WALL_RESTITUTION;
    }
    if ball.pos.x > FIELD_WIDTH - BALL_RADIUS {
        if in_goal_mouth(ball.pos.y) {
            return Some(scorer_for_edge(true, second_half));
        }
        ball.pos.x = FIELD_WIDTH - BALL_RADIUS;
        ball.vel.x *= -WALL_RESTITUTION;
    }

    collide_with_players(ball, start, players);
    None
}

/// Rolling friction; components slower than `BALL_REST_SPEED` stop dead
fn damp_ball(vel: Vec2) -> Vec2 {
    let snap = |v: f32| if v.abs() < BALL_REST_SPEED { 0.0 } else { v };
    let damped = vel * BALL_FRICTION;
    Vec2::new(snap(damped.x), snap(damped.y))
}

/// Resolve ball contact with players. A resting ball gets a plain overlap
/// check; a moving ball is swept along its path so it cannot skip a player.
fn collide_with_players(ball: &mut Ball, start: Vec2, players: &[Player]) {
    let end = ball.pos;
    let resting = start.distance_squared(end) < RESTING_MOVE_SQ;
    let touch = PLAYER_RADIUS + BALL_RADIUS;

    for player in players {
        if resting {
            if !circles_overlap(player.pos, PLAYER_RADIUS, ball.pos, BALL_RADIUS) {
                continue;
            }
            let offset = ball.pos - player.pos;
            let dist = offset.length();
            if dist > 0.0 {
                let normal = offset / dist;
                ball.pos += normal * (touch - dist);
                ball.vel += contact_boost(normal, player.vel);
            }
            continue;
        }

        if let Some(closest) = segment_hits_circle(start, end, player.pos, touch) {
            let offset = closest - player.pos;
            let dist = offset.length();
            let normal = if dist == 0.0 { Vec2::X } else { offset / dist };
            ball.pos = closest + normal * (touch - dist);
            ball.vel += contact_boost(normal, player.vel);
        }
    }
}

fn contact_boost(normal: Vec2, player_vel: Vec2) -> Vec2 {
    Vec2::new(
        normal.x * (CONTACT_BOOST + player_vel.x.abs() * CONTACT_CARRY),
        normal.y * (CONTACT_BOOST + player_vel.y.abs() * CONTACT_CARRY),
    )
}
