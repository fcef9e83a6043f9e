//! Content-store contract plus the minimal write paths behind it.
//!
//! The engagement core only needs three facts about a target entity: does it
//! exist, who owns it, and a text snapshot for the notification message.
//! Everything else about posts/comments/users is ordinary CRUD kept to the
//! minimum that makes toggles and chat exercisable.

use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use sprout_types::models::EntityType;

use crate::models::UserRow;
use crate::{Database, OptionalExt};

/// Owner and creation-time snapshot of a toggle target. The snapshot is
/// denormalized into the notification row and never updated afterwards.
#[derive(Debug, Clone)]
pub struct ContentRef {
    pub owner_id: Uuid,
    pub snapshot: String,
}

pub fn lookup_entity(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: Uuid,
) -> Result<Option<ContentRef>> {
    let sql = match entity_type {
        EntityType::Post => "SELECT author_id, content FROM posts WHERE id = ?1",
        EntityType::Comment => "SELECT author_id, content FROM comments WHERE id = ?1",
        // A user entity owns itself; its username stands in for content.
        EntityType::User => "SELECT id, username FROM users WHERE id = ?1",
    };

    let row = conn
        .query_row(sql, [entity_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .optional()?;

    match row {
        Some((owner, snapshot)) => {
            let owner_id = owner
                .parse::<Uuid>()
                .map_err(|e| anyhow::anyhow!("corrupt owner id '{}': {}", owner, e))?;
            Ok(Some(ContentRef { owner_id, snapshot }))
        }
        None => Ok(None),
    }
}

// -- Users --

pub fn create_user(conn: &Connection, id: Uuid, username: &str, password_hash: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
        rusqlite::params![id.to_string(), username, password_hash],
    )?;
    Ok(())
}

impl Database {
    pub fn create_user(&self, id: Uuid, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| create_user(conn, id, username, password_hash))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.prepare(
                "SELECT id, username, password, created_at FROM users WHERE username = ?1",
            )?
            .query_row([username], |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    password: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .optional()
        })
    }

    /// Of the given ids, the ones with no users row.
    pub fn unknown_users(&self, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM users WHERE id = ?1")?;
            let mut missing = Vec::new();
            for id in ids {
                let found = stmt
                    .query_row([id.to_string()], |_| Ok(()))
                    .optional()?;
                if found.is_none() {
                    missing.push(*id);
                }
            }
            Ok(missing)
        })
    }

    // -- Posts & comments --

    pub fn create_post(&self, id: Uuid, author_id: Uuid, content: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, author_id, content) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), author_id.to_string(), content],
            )?;
            Ok(())
        })
    }

    pub fn create_comment(
        &self,
        id: Uuid,
        post_id: Uuid,
        author_id: Uuid,
        parent_id: Option<Uuid>,
        content: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, parent_id, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.to_string(),
                    post_id.to_string(),
                    author_id.to_string(),
                    parent_id.map(|p| p.to_string()),
                    content,
                ],
            )?;
            Ok(())
        })
    }

    pub fn entity_lookup(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Option<ContentRef>> {
        self.with_conn(|conn| lookup_entity(conn, entity_type, entity_id))
    }

    // -- Conversations & messages --

    pub fn create_conversation(
        &self,
        id: Uuid,
        name: Option<&str>,
        member_ids: &[Uuid],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, name, is_group) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), name, (member_ids.len() > 2) as i64],
            )?;
            for member in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id)
                     VALUES (?1, ?2)",
                    rusqlite::params![id.to_string(), member.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Member ids of a conversation, or None if the conversation is unknown.
    pub fn conversation_members(&self, conversation_id: Uuid) -> Result<Option<Vec<Uuid>>> {
        self.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1",
                    [conversation_id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let mut stmt = conn.prepare(
                "SELECT user_id FROM conversation_members WHERE conversation_id = ?1",
            )?;
            let members = stmt
                .query_map([conversation_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Some(
                members
                    .into_iter()
                    .filter_map(|id| id.parse::<Uuid>().ok())
                    .collect(),
            ))
        })
    }

    pub fn insert_message(
        &self,
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    id.to_string(),
                    conversation_id.to_string(),
                    sender_id.to_string(),
                    content,
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_each_entity_type() {
        let db = Database::open_in_memory().unwrap();
        let author = Uuid::new_v4();
        let post = Uuid::new_v4();
        let comment = Uuid::new_v4();

        db.create_user(author, "fern", "hash").unwrap();
        db.create_post(post, author, "my monstera is thriving").unwrap();
        db.create_comment(comment, post, author, None, "nice leaves").unwrap();

        let p = db.entity_lookup(EntityType::Post, post).unwrap().unwrap();
        assert_eq!(p.owner_id, author);
        assert_eq!(p.snapshot, "my monstera is thriving");

        let c = db.entity_lookup(EntityType::Comment, comment).unwrap().unwrap();
        assert_eq!(c.owner_id, author);

        // a user owns itself
        let u = db.entity_lookup(EntityType::User, author).unwrap().unwrap();
        assert_eq!(u.owner_id, author);
        assert_eq!(u.snapshot, "fern");

        assert!(db
            .entity_lookup(EntityType::Post, Uuid::new_v4())
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_users_reports_only_the_missing_ids() {
        let db = Database::open_in_memory().unwrap();
        let known = Uuid::new_v4();
        let missing = Uuid::new_v4();
        db.create_user(known, "ivy", "hash").unwrap();

        assert!(db.unknown_users(&[known]).unwrap().is_empty());
        assert_eq!(db.unknown_users(&[known, missing]).unwrap(), vec![missing]);
    }

    #[test]
    fn conversation_membership_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        db.create_user(a, "a", "hash").unwrap();
        db.create_user(b, "b", "hash").unwrap();

        let convo = Uuid::new_v4();
        db.create_conversation(convo, None, &[a, b]).unwrap();

        let members = db.conversation_members(convo).unwrap().unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&a) && members.contains(&b));

        assert!(db.conversation_members(Uuid::new_v4()).unwrap().is_none());
    }
}
