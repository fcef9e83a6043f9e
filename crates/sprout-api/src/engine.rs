//! Toggle Engine: flips a relationship and keeps the notification ledger
//! consistent with it, inside one transaction, then hands the result to the
//! Delivery Dispatcher.
//!
//! Every toggle kind (like post, like comment, save post, follow) goes
//! through this one path instead of reimplementing check-then-act per kind.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use sprout_db::ledger::{self, LedgerError};
use sprout_db::relationships::{self, InsertOutcome};
use sprout_db::{Database, content};
use sprout_gateway::dispatcher::{DeliveryStatus, Dispatcher};
use sprout_gateway::presence::PresenceDirectory;
use sprout_types::events::RealtimeEvent;
use sprout_types::models::RelationKind;

/// Room that receives a fan-out of every toggle state change, so feed views
/// can update counters live. The acting user's own connection is excluded.
pub const ACTIVITY_ROOM: &str = "activity";

#[derive(Debug, Error)]
pub enum EngineError {
    /// The liked post / followed user no longer exists. Raised before any
    /// mutation.
    #[error("toggle target not found")]
    NotFound,

    /// Database failure mid-toggle; everything rolled back.
    #[error("toggle transaction failed: {0}")]
    Transaction(#[from] anyhow::Error),
}

/// What a committed toggle produced.
#[derive(Debug, Clone, Copy)]
pub struct ToggleOutcome {
    pub active: bool,
    /// Recipient of the notification recorded by this activation, when one
    /// was (no self-notifications, and saves have no notification at all).
    pub notified: Option<Uuid>,
}

#[derive(Clone)]
pub struct ToggleEngine {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    directory: PresenceDirectory,
}

impl ToggleEngine {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, directory: PresenceDirectory) -> Self {
        Self {
            db,
            dispatcher,
            directory,
        }
    }

    /// Toggle `(kind, actor, target)` and return the new state.
    ///
    /// The relationship flip and the ledger mutation commit atomically;
    /// delivery happens strictly after commit and can never fail the call.
    pub async fn toggle(
        &self,
        kind: RelationKind,
        actor_id: Uuid,
        target_id: Uuid,
    ) -> Result<ToggleOutcome, EngineError> {
        // Run blocking DB work off the async runtime
        let db = self.db.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            run_toggle_transaction(&db, kind, actor_id, target_id)
        })
        .await
        .map_err(|e| EngineError::Transaction(anyhow::anyhow!("join error: {}", e)))??;

        // Committed. Everything from here is fire-and-forget.
        let event = RealtimeEvent::Notification {
            kind: kind.into(),
            actor_id,
            entity_id: target_id,
            active: outcome.active,
        };

        if outcome.active {
            if let Some(recipient) = outcome.notified {
                if self.dispatcher.deliver_direct(recipient, event.clone())
                    == DeliveryStatus::NotConnected
                {
                    debug!(
                        "{} offline, {} notification stays poll-only",
                        recipient, kind
                    );
                }
            }
        }

        // Room subscribers see both directions of the toggle; the actor's
        // own connection is skipped.
        let exclude = self.directory.lookup(actor_id);
        self.dispatcher.deliver_room(ACTIVITY_ROOM, event, exclude);

        Ok(outcome)
    }
}

/// The atomic part: target lookup, relationship flip, ledger mutation.
fn run_toggle_transaction(
    db: &Database,
    kind: RelationKind,
    actor_id: Uuid,
    target_id: Uuid,
) -> Result<ToggleOutcome, EngineError> {
    let result = db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        let entity_type = kind.entity_type();

        // Target must exist before anything mutates.
        let target = match content::lookup_entity(&tx, entity_type, target_id)? {
            Some(target) => target,
            None => return Ok(None),
        };

        let outcome = if relationships::exists(&tx, kind, actor_id, target_id)? {
            deactivate(&tx, kind, actor_id, target_id)?
        } else {
            let inserted = relationships::insert(&tx, kind, actor_id, target_id)?;
            apply_insert_outcome(&tx, kind, actor_id, target_id, &target, inserted)?
        };

        tx.commit()?;
        Ok(Some(outcome))
    })?;

    result.ok_or(EngineError::NotFound)
}

/// Resolve what the insert attempt produced. `AlreadyActive` means a racing
/// request turned the relationship on between our existence check and the
/// insert; this toggle becomes the off half of the pair instead of an error.
fn apply_insert_outcome(
    conn: &rusqlite::Connection,
    kind: RelationKind,
    actor_id: Uuid,
    target_id: Uuid,
    target: &content::ContentRef,
    inserted: InsertOutcome,
) -> anyhow::Result<ToggleOutcome> {
    match inserted {
        InsertOutcome::Inserted => {
            let notified = record_notification(conn, kind, actor_id, target_id, target)?;
            Ok(ToggleOutcome {
                active: true,
                notified,
            })
        }
        InsertOutcome::AlreadyActive => deactivate(conn, kind, actor_id, target_id),
    }
}

fn deactivate(
    conn: &rusqlite::Connection,
    kind: RelationKind,
    actor_id: Uuid,
    target_id: Uuid,
) -> anyhow::Result<ToggleOutcome> {
    relationships::delete(conn, kind, actor_id, target_id)?;
    if let Some(ntype) = kind.notification_type() {
        ledger::retract(conn, actor_id, target_id, ntype)?;
    }
    Ok(ToggleOutcome {
        active: false,
        notified: None,
    })
}

fn record_notification(
    conn: &rusqlite::Connection,
    kind: RelationKind,
    actor_id: Uuid,
    target_id: Uuid,
    target: &content::ContentRef,
) -> anyhow::Result<Option<Uuid>> {
    let Some(ntype) = kind.notification_type() else {
        return Ok(None);
    };
    // No self-notifications.
    if actor_id == target.owner_id {
        return Ok(None);
    }

    match ledger::record(
        conn,
        target.owner_id,
        actor_id,
        ntype,
        kind.entity_type(),
        target_id,
        &target.snapshot,
    ) {
        Ok(_) => Ok(Some(target.owner_id)),
        Err(LedgerError::Duplicate) => {
            // A ledger row survived without its relationship. Keep it and
            // treat the toggle as already notified.
            warn!(
                "stale {} notification for actor {} entity {}, reusing it",
                ntype, actor_id, target_id
            );
            Ok(Some(target.owner_id))
        }
        Err(LedgerError::Db(e)) => Err(e.into()),
    }
}
