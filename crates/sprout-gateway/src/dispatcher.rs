//! Delivery Dispatcher: best-effort push of committed events to whichever
//! live connection currently belongs to the recipient.
//!
//! At-most-once, no retry, no acknowledgment. Per recipient, events arrive
//! in invocation order (one mpsc per connection, one outbound stream). A
//! recipient without a connection is not an error: the durable notification
//! row remains queryable and is the offline fallback.

use tracing::debug;
use uuid::Uuid;

use sprout_types::events::RealtimeEvent;

use crate::presence::PresenceDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// Recipient has no live connection. Callers may ignore this.
    NotConnected,
}

#[derive(Clone)]
pub struct Dispatcher {
    directory: PresenceDirectory,
}

impl Dispatcher {
    pub fn new(directory: PresenceDirectory) -> Self {
        Self { directory }
    }

    /// Push `event` to the user's live connection, if any.
    pub fn deliver_direct(&self, user_id: Uuid, event: RealtimeEvent) -> DeliveryStatus {
        match self.directory.sender_for_user(user_id) {
            Some(tx) if tx.send(event).is_ok() => DeliveryStatus::Delivered,
            _ => {
                debug!("no live connection for {}, event dropped", user_id);
                DeliveryStatus::NotConnected
            }
        }
    }

    /// Push `event` to every room member except `exclude` (used so an actor
    /// who also subscribes to the room does not echo their own action back).
    /// Returns how many connections the event was handed to.
    pub fn deliver_room(
        &self,
        room: &str,
        event: RealtimeEvent,
        exclude: Option<Uuid>,
    ) -> usize {
        let mut delivered = 0;
        for conn in self.directory.room_members(room, exclude) {
            if let Some(tx) = self.directory.sender_for_connection(conn) {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprout_types::models::RelationKind;

    fn like_event(active: bool) -> RealtimeEvent {
        RealtimeEvent::Notification {
            kind: RelationKind::LikePost.into(),
            actor_id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            active,
        }
    }

    #[test]
    fn direct_delivery_reaches_the_current_connection() {
        let directory = PresenceDirectory::new();
        let dispatcher = Dispatcher::new(directory.clone());
        let user = Uuid::new_v4();
        let mut reg = directory.register(user);

        assert_eq!(
            dispatcher.deliver_direct(user, like_event(true)),
            DeliveryStatus::Delivered
        );
        assert!(matches!(
            reg.events.try_recv(),
            Ok(RealtimeEvent::Notification { active: true, .. })
        ));
    }

    #[test]
    fn offline_recipient_is_not_an_error() {
        let directory = PresenceDirectory::new();
        let dispatcher = Dispatcher::new(directory);

        assert_eq!(
            dispatcher.deliver_direct(Uuid::new_v4(), like_event(true)),
            DeliveryStatus::NotConnected
        );
    }

    #[test]
    fn per_recipient_ordering_follows_invocation_order() {
        let directory = PresenceDirectory::new();
        let dispatcher = Dispatcher::new(directory.clone());
        let user = Uuid::new_v4();
        let mut reg = directory.register(user);

        dispatcher.deliver_direct(user, like_event(true));
        dispatcher.deliver_direct(user, like_event(false));

        assert!(matches!(
            reg.events.try_recv(),
            Ok(RealtimeEvent::Notification { active: true, .. })
        ));
        assert!(matches!(
            reg.events.try_recv(),
            Ok(RealtimeEvent::Notification { active: false, .. })
        ));
    }

    #[test]
    fn room_delivery_skips_the_excluded_connection() {
        let directory = PresenceDirectory::new();
        let dispatcher = Dispatcher::new(directory.clone());

        let mut actor = directory.register(Uuid::new_v4());
        let mut other = directory.register(Uuid::new_v4());
        directory.join_room(actor.connection_id, "feed");
        directory.join_room(other.connection_id, "feed");

        let delivered =
            dispatcher.deliver_room("feed", like_event(true), Some(actor.connection_id));
        assert_eq!(delivered, 1);
        assert!(other.events.try_recv().is_ok());
        assert!(actor.events.try_recv().is_err());
    }

    #[test]
    fn empty_room_delivers_nothing() {
        let directory = PresenceDirectory::new();
        let dispatcher = Dispatcher::new(directory);
        assert_eq!(dispatcher.deliver_room("nowhere", like_event(true), None), 0);
    }
}
