//! Presence Directory: the process-lifetime map from user identity to the
//! one live connection that currently belongs to it, plus the room overlay.
//!
//! Everything here is in-memory and guarded by a single RwLock. Critical
//! sections are short and never await; sends go over unbounded mpsc channels
//! so they cannot block under the lock. A deployment with multiple server
//! instances needs sticky routing or a shared directory in place of this.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use sprout_types::events::RealtimeEvent;

struct ConnectionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<RealtimeEvent>,
}

#[derive(Default)]
struct DirectoryState {
    /// user_id -> connection_id (at most one per user; last-connect-wins)
    users: HashMap<Uuid, Uuid>,
    /// connection_id -> entry (reverse index for unregister-by-connection)
    connections: HashMap<Uuid, ConnectionEntry>,
    /// room name -> member connection ids
    rooms: HashMap<String, HashSet<Uuid>>,
    /// connection_id -> rooms it joined, for teardown
    rooms_by_conn: HashMap<Uuid, HashSet<String>>,
}

/// Handed to a freshly registered connection: its id plus the receiving end
/// of its outbound event stream.
pub struct Registration {
    pub connection_id: Uuid,
    pub events: mpsc::UnboundedReceiver<RealtimeEvent>,
}

#[derive(Clone)]
pub struct PresenceDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(DirectoryState::default())),
        }
    }

    /// Register a connection for `user_id`, replacing any prior one.
    /// Dropping the evicted entry's sender closes its receiver, which ends
    /// the old connection's forward loop.
    pub fn register(&self, user_id: Uuid) -> Registration {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.write().expect("presence lock poisoned");
        if let Some(old_conn) = state.users.insert(user_id, connection_id) {
            remove_connection(&mut state, old_conn);
            debug!("user {} reconnected, evicting connection {}", user_id, old_conn);
        }
        state
            .connections
            .insert(connection_id, ConnectionEntry { user_id, tx });

        Registration {
            connection_id,
            events: rx,
        }
    }

    /// Remove the entry whose connection_id matches, wherever its user is,
    /// and leave every room it had joined. A no-op for unknown or already
    /// evicted connections, so a stale disconnect cannot unmap a newer
    /// connection for the same user.
    pub fn unregister(&self, connection_id: Uuid) {
        let mut state = self.state.write().expect("presence lock poisoned");
        if let Some(entry) = remove_connection(&mut state, connection_id) {
            if state.users.get(&entry.user_id) == Some(&connection_id) {
                state.users.remove(&entry.user_id);
            }
        }
    }

    /// Room membership is connection-scoped: a reconnecting user has to
    /// rejoin, nothing is restored.
    pub fn join_room(&self, connection_id: Uuid, room: &str) {
        let mut state = self.state.write().expect("presence lock poisoned");
        if !state.connections.contains_key(&connection_id) {
            return;
        }
        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id);
        state
            .rooms_by_conn
            .entry(connection_id)
            .or_default()
            .insert(room.to_string());
    }

    pub fn lookup(&self, user_id: Uuid) -> Option<Uuid> {
        let state = self.state.read().expect("presence lock poisoned");
        state.users.get(&user_id).copied()
    }

    pub fn room_members(&self, room: &str, exclude: Option<Uuid>) -> Vec<Uuid> {
        let state = self.state.read().expect("presence lock poisoned");
        state
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|conn| Some(*conn) != exclude)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sender for a connection, cloned out so the lock is released before
    /// anything is pushed.
    pub(crate) fn sender_for_connection(
        &self,
        connection_id: Uuid,
    ) -> Option<mpsc::UnboundedSender<RealtimeEvent>> {
        let state = self.state.read().expect("presence lock poisoned");
        state.connections.get(&connection_id).map(|e| e.tx.clone())
    }

    pub(crate) fn sender_for_user(
        &self,
        user_id: Uuid,
    ) -> Option<mpsc::UnboundedSender<RealtimeEvent>> {
        let state = self.state.read().expect("presence lock poisoned");
        let conn = state.users.get(&user_id)?;
        state.connections.get(conn).map(|e| e.tx.clone())
    }

    /// Drop every live sender and clear the directory. Connected clients'
    /// forward loops end when their receivers close.
    pub fn shutdown(&self) {
        let mut state = self.state.write().expect("presence lock poisoned");
        *state = DirectoryState::default();
    }

    #[cfg(test)]
    pub(crate) fn connection_count(&self) -> usize {
        self.state.read().unwrap().connections.len()
    }
}

impl Default for PresenceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_connection(state: &mut DirectoryState, connection_id: Uuid) -> Option<ConnectionEntry> {
    let entry = state.connections.remove(&connection_id);
    if let Some(rooms) = state.rooms_by_conn.remove(&connection_id) {
        for room in rooms {
            if let Some(members) = state.rooms.get_mut(&room) {
                members.remove(&connection_id);
                // rooms exist only while someone references them
                if members.is_empty() {
                    state.rooms.remove(&room);
                }
            }
        }
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_connect_wins() {
        let directory = PresenceDirectory::new();
        let user = Uuid::new_v4();

        let first = directory.register(user);
        let second = directory.register(user);

        assert_eq!(directory.lookup(user), Some(second.connection_id));
        // the evicted entry is gone entirely
        assert_eq!(directory.connection_count(), 1);

        // a stale disconnect from the first connection changes nothing
        directory.unregister(first.connection_id);
        assert_eq!(directory.lookup(user), Some(second.connection_id));
    }

    #[test]
    fn evicted_connection_receiver_closes() {
        let directory = PresenceDirectory::new();
        let user = Uuid::new_v4();

        let mut first = directory.register(user);
        let _second = directory.register(user);

        // sender dropped on eviction -> channel reports disconnected
        assert!(matches!(
            first.events.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(directory.sender_for_connection(first.connection_id).is_none());
    }

    #[test]
    fn unregister_tears_down_rooms() {
        let directory = PresenceDirectory::new();
        let user = Uuid::new_v4();

        let reg = directory.register(user);
        directory.join_room(reg.connection_id, "greenhouse");
        assert_eq!(
            directory.room_members("greenhouse", None),
            vec![reg.connection_id]
        );

        directory.unregister(reg.connection_id);
        assert!(directory.lookup(user).is_none());
        assert!(directory.room_members("greenhouse", None).is_empty());
    }

    #[test]
    fn room_exclusion_never_returns_excluded() {
        let directory = PresenceDirectory::new();
        let a = directory.register(Uuid::new_v4());
        let b = directory.register(Uuid::new_v4());

        directory.join_room(a.connection_id, "feed");
        directory.join_room(b.connection_id, "feed");

        let members = directory.room_members("feed", Some(a.connection_id));
        assert_eq!(members, vec![b.connection_id]);
    }

    #[test]
    fn join_room_ignores_unknown_connection() {
        let directory = PresenceDirectory::new();
        directory.join_room(Uuid::new_v4(), "feed");
        assert!(directory.room_members("feed", None).is_empty());
    }

    #[test]
    fn shutdown_clears_everything() {
        let directory = PresenceDirectory::new();
        let user = Uuid::new_v4();
        let mut reg = directory.register(user);
        directory.join_room(reg.connection_id, "feed");

        directory.shutdown();
        assert!(directory.lookup(user).is_none());
        assert!(directory.room_members("feed", None).is_empty());
        assert!(matches!(
            reg.events.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
