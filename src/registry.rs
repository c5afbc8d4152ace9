//! Process-wide room registry.
//!
//! Maps room codes to live room state, loading through from the snapshot
//! store on miss so a room can resume after a process restart. Rooms are
//! dropped from memory once their last member leaves; store retention is the
//! store's concern.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{GameError, Result};
use crate::room::Room;
use crate::store::Store;
use crate::types::generate_room_code;

pub struct RoomRegistry {
    rooms: DashMap<String, Arc<RwLock<Room>>>,
    store: Arc<dyn Store>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            rooms: DashMap::new(),
            store,
        }
    }

    /// Live room for a code, reconstructing it from a snapshot on miss.
    pub async fn get(&self, code: &str) -> Result<Arc<RwLock<Room>>> {
        if let Some(room) = self.rooms.get(code) {
            return Ok(room.value().clone());
        }
        match self.store.load_room(code).await {
            Ok(Some(snapshot)) => {
                debug!("room {code} restored from snapshot");
                let room = Arc::new(RwLock::new(Room::from_snapshot(snapshot)));
                let entry = self.rooms.entry(code.to_string()).or_insert(room);
                Ok(entry.value().clone())
            }
            Ok(None) => Err(GameError::RoomNotFound),
            Err(e) => {
                warn!("snapshot load failed for {code}: {e}");
                Err(GameError::RoomNotFound)
            }
        }
    }

    /// Allocate a fresh room with a collision-checked code; the requesting
    /// connection becomes the host connection.
    pub async fn create(&self, host_conn: &str) -> Result<(String, Arc<RwLock<Room>>)> {
        loop {
            let code = generate_room_code();
            if self.rooms.contains_key(&code) {
                continue;
            }
            if matches!(self.store.load_room(&code).await, Ok(Some(_))) {
                continue;
            }
            let room = Arc::new(RwLock::new(Room::new(code.clone(), host_conn)));
            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    vacant.insert(room.clone());
                }
            }
            let snapshot = room.write().await.to_snapshot();
            if let Err(e) = self.store.save_room(&code, snapshot).await {
                warn!("initial snapshot save failed for {code}: {e}");
            }
            return Ok((code, room));
        }
    }

    /// Drop a room from memory. The persisted snapshot stays behind.
    pub fn remove(&self, code: &str) {
        self.rooms.remove(code);
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
