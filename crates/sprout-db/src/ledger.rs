//! Notification Ledger: one durable row per engagement event.
//!
//! Toggle-backed rows (like/follow) mirror a relationship row and are
//! retracted with it; content rows (comment/reply) are permanent. The
//! read/unread flag is the only field that ever mutates.

use anyhow::Result;
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use sprout_types::models::{EntityType, NotificationType};

use crate::models::NotificationRow;
use crate::Database;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// An active row for the same (actor_id, entity_id, type) already
    /// exists. Guards against double-fire from a retried toggle.
    #[error("notification already recorded for this actor, entity and type")]
    Duplicate,

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

/// Record a toggle-backed notification. Fails with [`LedgerError::Duplicate`]
/// if the same action already produced one.
pub fn record(
    conn: &Connection,
    recipient_id: Uuid,
    actor_id: Uuid,
    kind: NotificationType,
    entity_type: EntityType,
    entity_id: Uuid,
    message: &str,
) -> Result<Uuid, LedgerError> {
    let existing = conn.query_row(
        "SELECT 1 FROM notifications WHERE actor_id = ?1 AND entity_id = ?2 AND type = ?3",
        rusqlite::params![actor_id.to_string(), entity_id.to_string(), kind.as_str()],
        |_| Ok(()),
    );
    match existing {
        Ok(()) => return Err(LedgerError::Duplicate),
        Err(rusqlite::Error::QueryReturnedNoRows) => {}
        Err(e) => return Err(e.into()),
    }

    append(conn, recipient_id, actor_id, kind, entity_type, entity_id, message).map_err(Into::into)
}

/// Insert without the duplicate guard. Used for permanent content
/// notifications (comment/reply), where the same actor may legitimately act
/// on the same entity more than once.
pub fn append(
    conn: &Connection,
    recipient_id: Uuid,
    actor_id: Uuid,
    kind: NotificationType,
    entity_type: EntityType,
    entity_id: Uuid,
    message: &str,
) -> Result<Uuid, rusqlite::Error> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO notifications (id, recipient_id, actor_id, type, entity_type, entity_id, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            id.to_string(),
            recipient_id.to_string(),
            actor_id.to_string(),
            kind.as_str(),
            entity_type.as_str(),
            entity_id.to_string(),
            message,
        ],
    )?;
    Ok(id)
}

/// Delete the notification matching (actor_id, entity_id, type) if present.
/// A no-op when absent: retraction may race with one already processed.
pub fn retract(
    conn: &Connection,
    actor_id: Uuid,
    entity_id: Uuid,
    kind: NotificationType,
) -> Result<()> {
    conn.execute(
        "DELETE FROM notifications WHERE actor_id = ?1 AND entity_id = ?2 AND type = ?3",
        rusqlite::params![actor_id.to_string(), entity_id.to_string(), kind.as_str()],
    )?;
    Ok(())
}

pub fn notification_exists(
    conn: &Connection,
    actor_id: Uuid,
    entity_id: Uuid,
    kind: NotificationType,
) -> Result<bool> {
    let existing = conn.query_row(
        "SELECT 1 FROM notifications WHERE actor_id = ?1 AND entity_id = ?2 AND type = ?3",
        rusqlite::params![actor_id.to_string(), entity_id.to_string(), kind.as_str()],
        |_| Ok(()),
    );
    match existing {
        Ok(()) => Ok(true),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl Database {
    /// Flip is_read for the given ids, restricted to rows owned by
    /// `recipient_id`. Foreign or unknown ids are silently excluded from
    /// the returned list.
    pub fn mark_notifications_read(
        &self,
        ids: &[Uuid],
        recipient_id: Uuid,
    ) -> Result<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE notifications SET is_read = 1
                 WHERE id IN ({}) AND recipient_id = ?{}
                 RETURNING id",
                placeholders.join(", "),
                ids.len() + 1
            );

            let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            let recipient = recipient_id.to_string();
            let mut params: Vec<&dyn rusqlite::types::ToSql> = id_strings
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();
            params.push(&recipient);

            let mut stmt = conn.prepare(&sql)?;
            let updated = stmt
                .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(updated
                .into_iter()
                .filter_map(|id| id.parse::<Uuid>().ok())
                .collect())
        })
    }

    /// Newest-first page of a user's notifications plus the total count
    /// (computed independent of the window).
    pub fn list_notifications(
        &self,
        recipient_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<NotificationRow>, u64)> {
        self.with_conn(|conn| {
            let recipient = recipient_id.to_string();

            let total: u64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1",
                [&recipient],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, actor_id, type, entity_type, entity_id,
                        message, is_read, created_at
                 FROM notifications
                 WHERE recipient_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![recipient, limit, offset], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        actor_id: row.get(2)?,
                        kind: row.get(3)?,
                        entity_type: row.get(4)?,
                        entity_id: row.get(5)?,
                        message: row.get(6)?,
                        is_read: row.get::<_, i64>(7)? != 0,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content;

    fn db_with_users(users: &[Uuid]) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            for &id in users {
                content::create_user(conn, id, &format!("user-{id}"), "hash")?;
            }
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn record_rejects_duplicate_action() {
        let actor = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let db = db_with_users(&[actor, recipient]);
        let entity = Uuid::new_v4();

        db.with_conn(|conn| {
            record(
                conn,
                recipient,
                actor,
                NotificationType::Like,
                EntityType::Post,
                entity,
                "a mossy post",
            )
            .unwrap();

            let err = record(
                conn,
                recipient,
                actor,
                NotificationType::Like,
                EntityType::Post,
                entity,
                "a mossy post",
            )
            .unwrap_err();
            assert!(matches!(err, LedgerError::Duplicate));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn retract_is_a_noop_when_absent() {
        let actor = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let db = db_with_users(&[actor, recipient]);
        let entity = Uuid::new_v4();

        db.with_conn(|conn| {
            retract(conn, actor, entity, NotificationType::Like)?;

            record(
                conn,
                recipient,
                actor,
                NotificationType::Like,
                EntityType::Post,
                entity,
                "",
            )
            .unwrap();
            retract(conn, actor, entity, NotificationType::Like)?;
            assert!(!notification_exists(conn, actor, entity, NotificationType::Like)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn append_allows_repeated_content_actions() {
        let actor = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let db = db_with_users(&[actor, recipient]);
        let post = Uuid::new_v4();

        db.with_conn(|conn| {
            append(conn, recipient, actor, NotificationType::Comment, EntityType::Post, post, "first")?;
            append(conn, recipient, actor, NotificationType::Comment, EntityType::Post, post, "second")?;
            Ok(())
        })
        .unwrap();

        let (rows, total) = db.list_notifications(recipient, 0, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);
        // newest first
        assert_eq!(rows[0].message, "second");
        assert_eq!(rows[1].message, "first");
    }

    #[test]
    fn mark_read_only_touches_owned_rows() {
        let actor = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let db = db_with_users(&[actor, alice, bob]);

        let (for_alice, for_bob) = db
            .with_conn(|conn| {
                let a = append(
                    conn,
                    alice,
                    actor,
                    NotificationType::Like,
                    EntityType::Post,
                    Uuid::new_v4(),
                    "",
                )?;
                let b = append(
                    conn,
                    bob,
                    actor,
                    NotificationType::Like,
                    EntityType::Post,
                    Uuid::new_v4(),
                    "",
                )?;
                Ok((a, b))
            })
            .unwrap();

        let updated = db
            .mark_notifications_read(&[for_alice, for_bob, Uuid::new_v4()], alice)
            .unwrap();
        assert_eq!(updated, vec![for_alice]);

        // Bob's row stayed unread
        let (rows, _) = db.list_notifications(bob, 0, 10).unwrap();
        assert!(!rows[0].is_read);
        let (rows, _) = db.list_notifications(alice, 0, 10).unwrap();
        assert!(rows[0].is_read);
    }

    #[test]
    fn list_paginates_with_independent_total() {
        let actor = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let db = db_with_users(&[actor, recipient]);

        db.with_conn(|conn| {
            for i in 0..5 {
                append(
                    conn,
                    recipient,
                    actor,
                    NotificationType::Comment,
                    EntityType::Post,
                    Uuid::new_v4(),
                    &format!("n{i}"),
                )?;
            }
            Ok(())
        })
        .unwrap();

        let (page, total) = db.list_notifications(recipient, 2, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message, "n2");
        assert_eq!(page[1].message, "n1");
    }
}
