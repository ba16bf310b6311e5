use std::sync::{Arc, RwLock};

use anyhow::Result;
use rusqlite::{functions::FunctionFlags, Connection, Params};
use rusqlite_migration::Migrations;
use uuid::Uuid;

use crate::db::{changelog, transaction::DbTransaction, types::entity_type_name, Entity};

/// Handle to an audited entity store. Cloning is cheap; clones share the
/// same underlying connection.
#[derive(Clone)]
pub struct Db {
    conn: Arc<RwLock<Connection>>,
    author: Option<String>,
}

impl Db {
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.create_scalar_function("uuid7", 0, FunctionFlags::SQLITE_UTF8, |_ctx| {
            Ok(Uuid::now_v7().to_string())
        })?;

        changelog::init_change_tracking_tables(&conn)?;

        Ok(Db {
            conn: Arc::new(RwLock::new(conn)),
            author: None,
        })
    }

    pub fn migrate(&self, migrations: &Migrations) -> Result<()> {
        let mut conn = self
            .conn
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock for migration"))?;

        migrations.to_latest(&mut *conn)?;

        Ok(())
    }

    /// Returns a handle whose writes are attributed to the given author in
    /// the change log. Writes through a plain handle are attributed to the
    /// store's own database uuid.
    pub fn with_author(&self, author: impl Into<String>) -> Db {
        Db {
            conn: self.conn.clone(),
            author: Some(author.into()),
        }
    }

    /// The author recorded for writes made through this handle.
    pub fn author(&self) -> Result<String> {
        match &self.author {
            Some(author) => Ok(author.clone()),
            None => self.get_database_uuid(),
        }
    }

    pub(crate) fn author_override(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Each store gets a uuid on creation, used as the default change
    /// author and to tell replicas of the same data set apart.
    pub fn get_database_uuid(&self) -> Result<String> {
        let conn = self
            .conn
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock"))?;
        let uuid = conn.query_row(
            "SELECT value FROM ZV_METADATA WHERE key = 'database_uuid'",
            [],
            |row| row.get(0),
        )?;
        Ok(uuid)
    }

    /// Calls the supplied closure with a database transaction that can be
    /// used to perform reads and writes. Commits automatically if the
    /// closure returns Ok, otherwise rolls back.
    pub fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DbTransaction) -> Result<R>,
    {
        let mut conn = self
            .conn
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock"))?;

        let txn = conn.transaction()?;
        let result = f(&DbTransaction::new(self, &txn))?;
        txn.commit()?;

        Ok(result)
    }

    /// Shortcut to create a transaction and save a single entity.
    /// See DbTransaction::save()
    pub fn save<E: Entity>(&self, entity: &E) -> Result<E> {
        self.transaction(|txn| txn.save(entity))
    }

    /// Shortcut to create a transaction and fetch a single entity by id.
    /// See DbTransaction::get()
    pub fn get<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        self.transaction(|txn| txn.get(id))
    }

    /// Shortcut to create a transaction and execute a query.
    /// See DbTransaction::query()
    pub fn query<E: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<E>> {
        self.transaction(|txn| txn.query(sql, params))
    }

    /// Shortcut to create a transaction and delete a single entity by id.
    /// See DbTransaction::delete()
    pub fn delete<E: Entity>(&self, id: &str) -> Result<bool> {
        self.transaction(|txn| txn.delete::<E>(id))
    }

    pub(crate) fn table_name_for_type<T>(&self) -> String {
        entity_type_name::<T>()
    }

    pub(crate) fn table_column_names(
        &self,
        conn: &rusqlite::Connection,
        table_name: &str,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table_name))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(anyhow::anyhow!(
                "Table '{}' not found or has no columns",
                table_name
            ));
        }

        Ok(columns)
    }
}
