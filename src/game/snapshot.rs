//! Snapshot building for network transmission

use crate::ws::protocol::{BallSnapshot, PlayerSnapshot, StateSnapshot, Supporters};

use super::entity::{Spectator, Team};
use super::room::Room;

/// Builds the public per-tick state of a room
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Full state; rebuilt every tick, no deltas
    pub fn build(room: &Room) -> StateSnapshot {
        let players = room
            .players()
            .iter()
            .map(|p| PlayerSnapshot {
                id: p.id,
                name: p.name.clone(),
                team: p.team,
                x: p.pos.x,
                y: p.pos.y,
                energy: p.sprint_energy,
            })
            .collect();

        StateSnapshot {
            players,
            ball: BallSnapshot {
                x: room.ball.pos.x,
                y: room.ball.pos.y,
                vx: room.ball.vel.x,
                vy: room.ball.vel.y,
            },
            score: room.score,
            match_time: room.match_time,
            running: room.running,
            last_event: room.last_event(),
            event_id: room.event_id(),
            supporters: Self::tally_supporters(room.spectators()),
        }
    }

    /// Count spectators per supported team
    pub fn tally_supporters<'a>(spectators: impl IntoIterator<Item = &'a Spectator>) -> Supporters {
        spectators
            .into_iter()
            .fold(Supporters::default(), |mut tally, spectator| {
                match spectator.support_team {
                    Some(Team::Blue) => tally.blue += 1,
                    Some(Team::Red) => tally.red += 1,
                    None => {}
                }
                tally
            })
    }
}
