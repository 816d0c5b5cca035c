//! Registry of live rooms and the connection -> room index

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::info;

use crate::ws::protocol::ServerMsg;

use super::room::Room;
use super::ConnId;

/// Buffered state frames per room before a slow connection starts lagging
const ROOM_BROADCAST_CAPACITY: usize = 64;

/// A room plus the channel its state frames go out on
pub struct RoomEntry {
    pub room: Room,
    pub state_tx: broadcast::Sender<ServerMsg>,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        let (state_tx, _) = broadcast::channel(ROOM_BROADCAST_CAPACITY);
        Self { room, state_tx }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("room {0} not found")]
    NotFound(String),

    #[error("room {0} still has connections")]
    NotEmpty(String),
}

/// Owns every room of the process
pub struct RoomRegistry {
    rooms: HashMap<String, RoomEntry>,
    /// Which room each connection joined
    sessions: HashMap<ConnId, String>,
    max_step_dt: f32,
}

impl RoomRegistry {
    pub fn new(max_step_dt: f32) -> Self {
        Self {
            rooms: HashMap::new(),
            sessions: HashMap::new(),
            max_step_dt,
        }
    }

    /// Look up a room, creating it with default state if absent
    pub fn get_or_create(&mut self, id: &str, now: Instant) -> &mut RoomEntry {
        let max_step_dt = self.max_step_dt;
        self.rooms.entry(id.to_string()).or_insert_with(|| {
            info!(room_id = %id, "Room created");
            RoomEntry::new(Room::new(id.to_string(), now, max_step_dt))
        })
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&RoomEntry> {
        self.rooms.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RoomEntry> {
        self.rooms.get_mut(id)
    }

    /// Evict a room; only empty rooms may go
    pub fn remove_room(&mut self, id: &str) -> Result<Room, RegistryError> {
        match self.rooms.get(id) {
            None => return Err(RegistryError::NotFound(id.to_string())),
            Some(entry) if !entry.room.is_empty() => {
                return Err(RegistryError::NotEmpty(id.to_string()))
            }
            Some(_) => {}
        }
        info!(room_id = %id, "Room removed");
        self.rooms
            .remove(id)
            .map(|entry| entry.room)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Drop a room regardless of who is in it, along with its sessions
    pub fn evict(&mut self, id: &str) -> Option<Room> {
        let entry = self.rooms.remove(id)?;
        self.sessions.retain(|_, room_id| room_id != id);
        Some(entry.room)
    }

    pub fn bind(&mut self, conn: ConnId, room_id: &str) {
        self.sessions.insert(conn, room_id.to_string());
    }

    pub fn unbind(&mut self, conn: ConnId) -> Option<String> {
        self.sessions.remove(&conn)
    }

    pub fn room_of(&self, conn: ConnId) -> Option<&str> {
        self.sessions.get(&conn).map(String::as_str)
    }

    /// Room a connection is in, if both the session and the room still exist
    pub fn room_for_conn_mut(&mut self, conn: ConnId) -> Option<&mut RoomEntry> {
        let room_id = self.sessions.get(&conn)?;
        self.rooms.get_mut(room_id)
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoomEntry> {
        self.rooms.values()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn get_or_create_reuses_rooms() {
        let now = Instant::now();
        let mut registry = RoomRegistry::new(0.25);

        registry.get_or_create("abc", now).room.join(Uuid::new_v4(), "A".into(), now);
        registry.get_or_create("abc", now).room.join(Uuid::new_v4(), "B".into(), now);
        registry.get_or_create("ABC", now);

        assert_eq!(registry.room_count(), 2);
        assert_eq!(registry.get("abc").unwrap().room.seated_count(), 2);
        assert_eq!(registry.get("ABC").unwrap().room.seated_count(), 0);
    }

    #[test]
    fn only_empty_rooms_are_removed() {
        let now = Instant::now();
        let mut registry = RoomRegistry::new(0.25);
        let conn = Uuid::new_v4();
        registry.get_or_create("r", now).room.join(conn, "A".into(), now);

        assert_eq!(
            registry.remove_room("r").err(),
            Some(RegistryError::NotEmpty("r".into()))
        );
        registry.get_mut("r").unwrap().room.leave(conn);
        assert!(registry.remove_room("r").is_ok());
        assert_eq!(
            registry.remove_room("r").err(),
            Some(RegistryError::NotFound("r".into()))
        );
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn sessions_follow_connections() {
        let now = Instant::now();
        let mut registry = RoomRegistry::new(0.25);
        let conn = Uuid::new_v4();
        registry.get_or_create("r", now);
        registry.bind(conn, "r");

        assert_eq!(registry.room_of(conn), Some("r"));
        assert!(registry.room_for_conn_mut(conn).is_some());

        registry.evict("r");
        assert_eq!(registry.room_of(conn), None);
        assert!(registry.room_for_conn_mut(Uuid::new_v4()).is_none());
    }
}
