//! Game simulation modules

pub mod collision;
pub mod entity;
pub mod physics;
pub mod pitch;
pub mod registry;
pub mod room;
pub mod server;
pub mod snapshot;

pub use server::{GameServer, GameServerHandle, Outbound};

use uuid::Uuid;

/// Identifier of one client connection
pub type ConnId = Uuid;

/// Join rejections; the message is shown to the user as-is
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Invalid room ID.")]
    InvalidRoomId,

    #[error("Please enter your name.")]
    MissingName,
}
