use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{db::Db, history::HistoryError};

/// One committed write of a tracked entity: the full post-write value as
/// JSON, the acting author, and the commit timestamp in milliseconds.
///
/// The id is a uuidv7, so sorting by id gives commit-sequence order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub author: String,
    pub committed_at: i64,
    pub entity_value: String,
}

/// Read contract over the append-only change log.
///
/// The store behind this trait returns per-entity history newest-first;
/// consumers that need oldest-first order reverse it themselves.
pub trait ChangeLog {
    /// Change records for one entity, newest first, in commit-sequence
    /// order. An unknown identity yields an empty vec, not an error.
    fn changes_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<ChangeRecord>, HistoryError>;
}

impl ChangeLog for Db {
    fn changes_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<ChangeRecord>, HistoryError> {
        self.query(
            "SELECT id, entity_type, entity_id, author, committed_at, entity_value
             FROM ZV_CHANGE
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY id DESC",
            [entity_type, entity_id],
        )
        .map_err(HistoryError::StorageUnavailable)
    }
}

impl Db {
    /// One newest-first page of an entity's change records, for consumers
    /// that don't want to load an unbounded history in one read. Pass the
    /// id of the last record of the previous page to continue.
    pub fn changes_for_entity_before(
        &self,
        entity_type: &str,
        entity_id: &str,
        before_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChangeRecord>> {
        let cursor = before_id.unwrap_or("ffffffff-ffff-ffff-ffff-ffffffffffff");
        self.query(
            "SELECT id, entity_type, entity_id, author, committed_at, entity_value
             FROM ZV_CHANGE
             WHERE entity_type = ? AND entity_id = ? AND id < ?
             ORDER BY id DESC
             LIMIT ?",
            rusqlite::params![entity_type, entity_id, cursor, limit as i64],
        )
    }

    /// All change records committed after the given change id, oldest
    /// first. uuidv7 ids are sortable, so the id doubles as a cursor.
    pub fn changes_since(&self, change_id: &str) -> Result<Vec<ChangeRecord>> {
        self.query(
            "SELECT id, entity_type, entity_id, author, committed_at, entity_value
             FROM ZV_CHANGE
             WHERE id > ?
             ORDER BY id ASC",
            [change_id],
        )
    }
}

/// ZV is used as a prefix for the internal tables. Z puts them
/// at the end of alphabetical lists and V differentiates them from
/// entity tables.
pub(crate) fn init_change_tracking_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ZV_METADATA (
            key TEXT NOT NULL PRIMARY KEY,
            value TEXT NOT NULL
        );

        INSERT OR IGNORE INTO ZV_METADATA (key, value)
            VALUES ('database_uuid', uuid7());

        CREATE TABLE IF NOT EXISTS ZV_CHANGE (
            id TEXT NOT NULL PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            author TEXT NOT NULL,
            committed_at INTEGER NOT NULL,
            entity_value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS ZV_CHANGE_ENTITY
            ON ZV_CHANGE (entity_type, entity_id, id);
    ",
    )?;
    Ok(())
}
