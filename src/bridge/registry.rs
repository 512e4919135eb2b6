//! In-memory room registry.
//!
//! This module provides the [`RoomRegistry`] which tracks, per Matrix room:
//! - the current member list, overwritten on every membership update
//! - the third-party conversation the room is bound to, if any

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace};
use tokio::sync::Mutex;

/// Both maps of the registry, guarded together.
#[derive(Debug, Default)]
struct Rooms {
    /// Room id -> member ids, in the order they were given
    members: HashMap<String, Vec<String>>,
    /// Room id -> third-party conversation id
    third_party_rooms: HashMap<String, String>,
}

/// Shared registry of rooms known to the puppet session.
///
/// Cloning is cheap and every clone sees the same data. A single mutex
/// guards both maps.
///
/// # Examples
///
/// ```
/// use matrix_puppet::bridge::RoomRegistry;
///
/// # #[tokio::main]
/// # async fn main() {
/// let registry = RoomRegistry::new();
/// registry.bind_third_party_room("!room:example.org", "chat-42").await;
/// assert!(registry.get_members("!room:example.org").await.is_empty());
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct RoomRegistry {
    /// Thread-safe reference to the room maps
    rooms: Arc<Mutex<Rooms>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        RoomRegistry::default()
    }

    /// Binds `room_id` to `third_party_room_id`, replacing any previous binding.
    ///
    /// # Arguments
    ///
    /// * `room_id` - Matrix room id
    /// * `third_party_room_id` - Conversation id on the third-party network
    pub async fn bind_third_party_room(&self, room_id: &str, third_party_room_id: &str) {
        debug!("bind room {} to {}", room_id, third_party_room_id);
        self.rooms
            .lock()
            .await
            .third_party_rooms
            .insert(room_id.to_owned(), third_party_room_id.to_owned());
    }

    /// Returns the third-party conversation bound to `room_id`.
    pub async fn third_party_room_id(&self, room_id: &str) -> Option<String> {
        self.rooms
            .lock()
            .await
            .third_party_rooms
            .get(room_id)
            .cloned()
    }

    /// Returns the members of `room_id`, or an empty list for an unknown room.
    pub async fn get_members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .lock()
            .await
            .members
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replaces the member list of `room_id`.
    ///
    /// Duplicates are dropped, keeping the first occurrence.
    pub async fn replace_members(&self, room_id: &str, members: Vec<String>) {
        let mut unique: Vec<String> = Vec::with_capacity(members.len());
        for member in members {
            if !unique.contains(&member) {
                unique.push(member);
            }
        }

        trace!("room {} has {} members", room_id, unique.len());
        self.rooms
            .lock()
            .await
            .members
            .insert(room_id.to_owned(), unique);
    }
}
