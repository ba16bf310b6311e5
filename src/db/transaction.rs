use anyhow::Result;
use rusqlite::{params, Params, Transaction};
use uuid::Uuid;

use crate::db::{Db, Entity};

pub struct DbTransaction<'a> {
    db: &'a Db,
    txn: &'a Transaction<'a>,
}

impl<'a> DbTransaction<'a> {
    pub(crate) fn new(db: &'a Db, txn: &'a Transaction<'a>) -> Self {
        Self { db, txn }
    }

    pub fn connection(&self) -> &rusqlite::Connection {
        self.txn
    }

    /// Saves the entity to the database.
    ///
    /// The entity's type name is used for the table name, and the table
    /// columns are mapped to the entity fields using serde_rusqlite. If an
    /// entity with the same id already exists it is updated, otherwise a new
    /// entity is inserted with a new uuidv7 for its id.
    ///
    /// Every successful save appends one record to the change log inside the
    /// same transaction, capturing the full post-write entity value, the
    /// acting author, and the commit timestamp.
    ///
    /// Note that only fields present in both the table and entity are mapped.
    pub fn save<E: Entity>(&self, entity: &E) -> Result<E> {
        let table_name = self.db.table_name_for_type::<E>();
        let column_names = self.db.table_column_names(self.txn, &table_name)?;

        // Convert the entity to a JSON Value so we can manipulate it
        // generically without needing more than Serialize.
        let mut entity_value = serde_json::to_value(entity)?;
        let id = self.ensure_entity_id(&mut entity_value)?;

        if self.entity_exists(&table_name, &id)? {
            self.update_entity(&table_name, &column_names, &entity_value)?;
        } else {
            self.insert_entity(&table_name, &column_names, &entity_value)?;
        }

        self.record_change(&table_name, &id, &entity_value)?;

        // Convert back to E so the caller gets the id that was minted.
        Ok(serde_json::from_value(entity_value)?)
    }

    pub fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let table_name = self.db.table_name_for_type::<E>();
        let sql = format!("SELECT * FROM {} WHERE id = ? LIMIT 1", table_name);
        Ok(self.query::<E, _>(&sql, [id])?.into_iter().next())
    }

    pub fn query<E: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<E>> {
        let mut stmt = self.txn.prepare(sql)?;
        let entities = serde_rusqlite::from_rows::<E>(stmt.query(params)?)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    /// Deletes the entity row. Returns whether a row was removed.
    ///
    /// Only inserts and updates are audited; the entity's change log is
    /// left intact, so its version history stays readable after deletion.
    pub fn delete<E: Entity>(&self, id: &str) -> Result<bool> {
        let table_name = self.db.table_name_for_type::<E>();
        let sql = format!("DELETE FROM {} WHERE id = ?", table_name);
        let affected = self.txn.execute(&sql, [id])?;
        Ok(affected > 0)
    }

    fn ensure_entity_id(&self, entity_value: &mut serde_json::Value) -> Result<String> {
        match entity_value.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => Ok(id.to_string()),
            _ => {
                let new_id = Uuid::now_v7().to_string();
                entity_value["id"] = serde_json::Value::String(new_id.clone());
                Ok(new_id)
            }
        }
    }

    fn entity_exists(&self, table_name: &str, id: &str) -> Result<bool> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", table_name);
        let count: i64 = self.txn.query_row(&sql, params![id], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn update_entity(
        &self,
        table_name: &str,
        column_names: &[String],
        entity_value: &serde_json::Value,
    ) -> Result<()> {
        let set_clause = column_names
            .iter()
            .filter(|col| *col != "id")
            .map(|col| format!("{} = :{}", col, col))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!("UPDATE {} SET {} WHERE id = :id", table_name, set_clause);
        self.execute_with_named_params(&sql, entity_value, column_names)
    }

    fn insert_entity(
        &self,
        table_name: &str,
        column_names: &[String],
        entity_value: &serde_json::Value,
    ) -> Result<()> {
        let placeholders = column_names
            .iter()
            .map(|col| format!(":{}", col))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_name,
            column_names.join(", "),
            placeholders
        );
        self.execute_with_named_params(&sql, entity_value, column_names)
    }

    fn execute_with_named_params(
        &self,
        sql: &str,
        entity_value: &serde_json::Value,
        column_names: &[String],
    ) -> Result<()> {
        let mut stmt = self.txn.prepare(sql)?;
        let str_refs: Vec<&str> = column_names.iter().map(|s| s.as_str()).collect();
        let params = serde_rusqlite::to_params_named_with_fields(entity_value, &str_refs)?;
        stmt.execute(params.to_slice().as_slice())?;
        Ok(())
    }

    /// Appends one change record for a committed write. Records are
    /// append-only; nothing in the store ever updates or deletes them.
    fn record_change(
        &self,
        entity_type: &str,
        entity_id: &str,
        entity_value: &serde_json::Value,
    ) -> Result<()> {
        let change_id = Uuid::now_v7().to_string();
        // Resolved on the transaction's own connection; Db::author would
        // try to take the connection lock this transaction already holds.
        let author = match self.db.author_override() {
            Some(author) => author.to_string(),
            None => self.txn.query_row(
                "SELECT value FROM ZV_METADATA WHERE key = 'database_uuid'",
                [],
                |row| row.get(0),
            )?,
        };
        let committed_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_millis() as i64;
        let snapshot = serde_json::to_string(entity_value)?;

        log::debug!(
            "SQL EXECUTE: INSERT INTO ZV_CHANGE (id, entity_type, entity_id, author, committed_at, entity_value) VALUES (?, ?, ?, ?, ?, ?)"
        );
        let affected = self.txn.execute(
            "INSERT INTO ZV_CHANGE (id, entity_type, entity_id, author, committed_at, entity_value) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                change_id,
                entity_type,
                entity_id,
                author,
                committed_at,
                snapshot,
            ],
        )?;
        log::debug!("SQL EXECUTE RESULT: {} rows affected", affected);

        Ok(())
    }
}
