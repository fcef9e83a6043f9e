//! Relationship Store: the durable side of every toggle.
//!
//! All mutating primitives take a `&Connection` so the Toggle Engine can run
//! them inside the same transaction as the notification ledger mutation.

use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use sprout_types::models::RelationKind;

use crate::{Database, OptionalExt};

/// Result of attempting to insert a relationship row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The unique constraint on (kind, actor_id, target_id) fired: a racing
    /// request already turned the relationship on. The caller retries the
    /// toggle as a delete instead of raising.
    AlreadyActive,
}

pub fn exists(
    conn: &Connection,
    kind: RelationKind,
    actor_id: Uuid,
    target_id: Uuid,
) -> Result<bool> {
    let row = conn
        .query_row(
            "SELECT 1 FROM relationships WHERE kind = ?1 AND actor_id = ?2 AND target_id = ?3",
            rusqlite::params![kind.as_str(), actor_id.to_string(), target_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(row.is_some())
}

pub fn insert(
    conn: &Connection,
    kind: RelationKind,
    actor_id: Uuid,
    target_id: Uuid,
) -> Result<InsertOutcome> {
    let result = conn.execute(
        "INSERT INTO relationships (kind, actor_id, target_id) VALUES (?1, ?2, ?3)",
        rusqlite::params![kind.as_str(), actor_id.to_string(), target_id.to_string()],
    );

    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        // Only the uniqueness race maps to AlreadyActive; other constraint
        // failures (foreign keys) are real errors.
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Ok(InsertOutcome::AlreadyActive)
        }
        Err(e) => Err(e.into()),
    }
}

/// Physically deletes the row; absence IS the off state.
pub fn delete(
    conn: &Connection,
    kind: RelationKind,
    actor_id: Uuid,
    target_id: Uuid,
) -> Result<()> {
    conn.execute(
        "DELETE FROM relationships WHERE kind = ?1 AND actor_id = ?2 AND target_id = ?3",
        rusqlite::params![kind.as_str(), actor_id.to_string(), target_id.to_string()],
    )?;
    Ok(())
}

impl Database {
    pub fn relationship_exists(
        &self,
        kind: RelationKind,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool> {
        self.with_conn(|conn| exists(conn, kind, actor_id, target_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content;

    fn seed_user(db: &Database, id: Uuid) {
        db.with_conn(|conn| content::create_user(conn, id, &format!("user-{id}"), "hash"))
            .unwrap();
    }

    #[test]
    fn insert_then_duplicate_reports_already_active() {
        let db = Database::open_in_memory().unwrap();
        let actor = Uuid::new_v4();
        let target = Uuid::new_v4();
        seed_user(&db, actor);

        db.with_conn(|conn| {
            assert_eq!(
                insert(conn, RelationKind::SavePost, actor, target)?,
                InsertOutcome::Inserted
            );
            assert_eq!(
                insert(conn, RelationKind::SavePost, actor, target)?,
                InsertOutcome::AlreadyActive
            );
            assert!(exists(conn, RelationKind::SavePost, actor, target)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_removes_the_single_row() {
        let db = Database::open_in_memory().unwrap();
        let actor = Uuid::new_v4();
        let target = Uuid::new_v4();
        seed_user(&db, actor);

        db.with_conn(|conn| {
            insert(conn, RelationKind::Follow, actor, target)?;
            delete(conn, RelationKind::Follow, actor, target)?;
            assert!(!exists(conn, RelationKind::Follow, actor, target)?);
            // deleting an absent row is a no-op
            delete(conn, RelationKind::Follow, actor, target)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn foreign_key_failure_is_not_already_active() {
        let db = Database::open_in_memory().unwrap();
        // actor never seeded -> the actor_id foreign key fires, which must
        // surface as an error, not as the uniqueness-race outcome
        let err = db
            .with_conn(|conn| insert(conn, RelationKind::LikePost, Uuid::new_v4(), Uuid::new_v4()))
            .unwrap_err();
        assert!(err.to_string().contains("FOREIGN KEY"));
    }

    #[test]
    fn kinds_are_independent_dimensions() {
        let db = Database::open_in_memory().unwrap();
        let actor = Uuid::new_v4();
        let target = Uuid::new_v4();
        seed_user(&db, actor);

        db.with_conn(|conn| {
            insert(conn, RelationKind::LikePost, actor, target)?;
            assert!(!exists(conn, RelationKind::SavePost, actor, target)?);
            assert_eq!(
                insert(conn, RelationKind::SavePost, actor, target)?,
                InsertOutcome::Inserted
            );
            Ok(())
        })
        .unwrap();
    }
}
