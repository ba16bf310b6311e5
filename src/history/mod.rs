pub use error::HistoryError;

pub mod diff;
pub mod error;

use serde::Serialize;

use crate::db::{entity_type_name, ChangeLog, ChangeRecord, Db, Entity};

/// A reconstructed historical value of an entity at one commit point.
/// Derived from the change log on demand, never stored.
#[derive(Clone, Debug)]
pub struct Shadow<E> {
    pub entity: E,
    pub author: String,
    pub committed_at: i64,
    pub change_id: String,
}

/// One entry in an entity's version history. Built fresh per query and
/// handed to the caller; the outer layer decides how to serialize it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VersionRecord<V> {
    /// Zero-based, oldest commit first.
    pub version: usize,
    /// True for the single historical snapshot whose value is
    /// structurally identical to the caller-supplied current state.
    pub is_current_version: bool,
    pub author: String,
    /// Commit timestamp in milliseconds.
    pub created: i64,
    pub entity: V,
}

/// Replays an entity's change log into an ordered version list.
///
/// The change log is an explicit collaborator handed to the constructor,
/// so callers (and tests) decide where history is read from.
/// `Db::history()` is the common entry point.
pub struct VersionHistory<C> {
    log: C,
}

impl Db {
    /// Version history service reading from this store's change log.
    pub fn history(&self) -> VersionHistory<Db> {
        VersionHistory::new(self.clone())
    }
}

impl<C: ChangeLog> VersionHistory<C> {
    pub fn new(log: C) -> Self {
        Self { log }
    }

    /// Every committed state of the entity, oldest first.
    ///
    /// The store returns history newest-first; it is reversed here so
    /// that version indices count up from the oldest commit.
    pub fn shadows<E: Entity>(&self, entity_id: &str) -> Result<Vec<Shadow<E>>, HistoryError> {
        let entity_type = entity_type_name::<E>();
        let mut records = self.log.changes_for_entity(&entity_type, entity_id)?;
        records.reverse();

        log::debug!(
            "Replaying {} changes for {} '{}'",
            records.len(),
            entity_type,
            entity_id
        );

        records
            .into_iter()
            .map(|record| decode_shadow(&entity_type, record))
            .collect()
    }

    /// The entity's version history, oldest first, with versions numbered
    /// 0..N-1. At most one record is flagged as the current version: the
    /// first shadow (in oldest-first order) whose value is structurally
    /// identical to `current`. If the current state has not been committed
    /// yet, no record is flagged.
    pub fn versions<E: Entity>(
        &self,
        current: &E,
        entity_id: &str,
    ) -> Result<Vec<VersionRecord<E>>, HistoryError> {
        self.versions_mapped(current, entity_id, |entity| entity)
    }

    /// Same as [`Self::versions`], but each historical value is projected
    /// through `map` before being placed in the output record. The
    /// current-version comparison happens on the unprojected value.
    pub fn versions_mapped<E, V, F>(
        &self,
        current: &E,
        entity_id: &str,
        map: F,
    ) -> Result<Vec<VersionRecord<V>>, HistoryError>
    where
        E: Entity,
        F: Fn(E) -> V,
    {
        let entity_type = entity_type_name::<E>();
        let current_value = to_comparable(&entity_type, entity_id, current)?;

        let shadows = self.shadows::<E>(entity_id)?;
        let mut versions = Vec::with_capacity(shadows.len());
        let mut flagged = false;

        for (version, shadow) in shadows.into_iter().enumerate() {
            let shadow_value = to_comparable(&entity_type, entity_id, &shadow.entity)?;
            // First match wins when two commits produced identical states.
            let is_current_version =
                !flagged && !diff::has_differences(&current_value, &shadow_value);
            flagged = flagged || is_current_version;

            versions.push(VersionRecord {
                version,
                is_current_version,
                author: shadow.author,
                created: shadow.committed_at,
                entity: map(shadow.entity),
            });
        }

        Ok(versions)
    }
}

fn decode_shadow<E: Entity>(
    entity_type: &str,
    record: ChangeRecord,
) -> Result<Shadow<E>, HistoryError> {
    let entity =
        serde_json::from_str(&record.entity_value).map_err(|e| HistoryError::InvalidComparison {
            entity_type: entity_type.to_string(),
            entity_id: record.entity_id.clone(),
            reason: e.to_string(),
        })?;

    Ok(Shadow {
        entity,
        author: record.author,
        committed_at: record.committed_at,
        change_id: record.id,
    })
}

// Snapshots are decoded to E and re-serialized before comparison, so
// fields the current type no longer knows about don't count as changes.
fn to_comparable<E: Entity>(
    entity_type: &str,
    entity_id: &str,
    entity: &E,
) -> Result<serde_json::Value, HistoryError> {
    serde_json::to_value(entity).map_err(|e| HistoryError::InvalidComparison {
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use rusqlite_migration::{Migrations, M};
    use serde::{Deserialize, Serialize};

    use super::{HistoryError, VersionHistory};
    use crate::db::{ChangeLog, ChangeRecord, Db};

    #[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
    struct Company {
        pub id: String,
        pub name: String,
        pub industry: Option<String>,
    }

    fn setup_db() -> Result<Db> {
        let db = Db::open_memory()?;
        let migrations = Migrations::new(vec![M::up(
            "CREATE TABLE Company (name TEXT NOT NULL, industry TEXT, id TEXT NOT NULL PRIMARY KEY);",
        )]);
        db.migrate(&migrations)?;
        Ok(db)
    }

    #[test]
    fn versions_are_contiguous_and_oldest_first() -> Result<()> {
        let db = setup_db()?;

        let mut company = db.save(&Company {
            name: "Acme".to_string(),
            ..Default::default()
        })?;
        for industry in ["Energy", "Logistics", "Retail"] {
            company.industry = Some(industry.to_string());
            company = db.save(&company)?;
        }

        let versions = db.history().versions(&company, &company.id)?;
        assert_eq!(versions.len(), 4);
        for (i, record) in versions.iter().enumerate() {
            assert_eq!(record.version, i);
        }
        assert_eq!(versions[0].entity.industry, None);
        assert_eq!(versions[3].entity.industry, Some("Retail".to_string()));
        // Commit timestamps never decrease along the version sequence.
        assert!(versions.windows(2).all(|w| w[0].created <= w[1].created));
        Ok(())
    }

    #[test]
    fn current_version_flag_matches_supplied_state() -> Result<()> {
        let db = setup_db()?;

        // Three commits by alice, bob, alice.
        let committed = db.with_author("alice").save(&Company {
            name: "Acme".to_string(),
            ..Default::default()
        })?;
        let second = db.with_author("bob").save(&Company {
            industry: Some("Energy".to_string()),
            ..committed.clone()
        })?;
        db.with_author("alice").save(&Company {
            industry: Some("Logistics".to_string()),
            ..second.clone()
        })?;

        // The caller holds the second commit's state in memory.
        let versions = db.history().versions(&second, &second.id)?;
        assert_eq!(versions.len(), 3);
        assert_eq!(
            versions.iter().map(|v| v.author.as_str()).collect::<Vec<_>>(),
            ["alice", "bob", "alice"]
        );
        assert!(!versions[0].is_current_version);
        assert!(versions[1].is_current_version);
        assert!(!versions[2].is_current_version);
        Ok(())
    }

    #[test]
    fn empty_history_is_empty_not_error() -> Result<()> {
        let db = setup_db()?;
        let versions = db
            .history()
            .versions(&Company::default(), "no-such-id")?;
        assert!(versions.is_empty());
        Ok(())
    }

    #[test]
    fn uncommitted_edit_flags_nothing() -> Result<()> {
        let db = setup_db()?;

        let mut company = db.save(&Company {
            name: "Acme".to_string(),
            ..Default::default()
        })?;
        // Edited in memory, not yet committed.
        company.name = "Acme International".to_string();

        let versions = db.history().versions(&company, &company.id)?;
        assert_eq!(versions.len(), 1);
        assert!(!versions[0].is_current_version);
        Ok(())
    }

    #[test]
    fn at_most_one_current_version() -> Result<()> {
        let db = setup_db()?;

        let mut company = db.save(&Company {
            name: "Acme".to_string(),
            ..Default::default()
        })?;
        company.industry = Some("Energy".to_string());
        company = db.save(&company)?;

        let versions = db.history().versions(&company, &company.id)?;
        let current: Vec<_> = versions.iter().filter(|v| v.is_current_version).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].entity, company);
        Ok(())
    }

    #[test]
    fn duplicate_states_flag_first_match() -> Result<()> {
        let db = setup_db()?;

        // Two commits with byte-identical values.
        let company = db.save(&Company {
            name: "Acme".to_string(),
            ..Default::default()
        })?;
        db.save(&company)?;

        let versions = db.history().versions(&company, &company.id)?;
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_current_version);
        assert!(!versions[1].is_current_version);
        Ok(())
    }

    #[test]
    fn repeated_calls_yield_identical_output() -> Result<()> {
        let db = setup_db()?;

        let mut company = db.save(&Company {
            name: "Acme".to_string(),
            ..Default::default()
        })?;
        company.industry = Some("Energy".to_string());
        company = db.save(&company)?;

        let first = db.history().versions(&company, &company.id)?;
        let second = db.history().versions(&company, &company.id)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn projection_maps_each_version() -> Result<()> {
        let db = setup_db()?;

        #[derive(Debug, PartialEq)]
        struct CompanyName(String);

        let mut company = db.save(&Company {
            name: "Acme".to_string(),
            ..Default::default()
        })?;
        company.name = "Acme International".to_string();
        company = db.save(&company)?;

        let versions =
            db.history()
                .versions_mapped(&company, &company.id, |c: Company| CompanyName(c.name))?;
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].entity, CompanyName("Acme".to_string()));
        assert_eq!(versions[1].entity, CompanyName("Acme International".to_string()));
        assert!(versions[1].is_current_version);
        Ok(())
    }

    /// Change log that always fails, standing in for an unreachable store.
    struct FailingLog;

    impl ChangeLog for FailingLog {
        fn changes_for_entity(
            &self,
            _entity_type: &str,
            _entity_id: &str,
        ) -> Result<Vec<ChangeRecord>, HistoryError> {
            Err(HistoryError::StorageUnavailable(anyhow::anyhow!(
                "connection refused"
            )))
        }
    }

    #[test]
    fn storage_failure_propagates_unwrapped() {
        let history = VersionHistory::new(FailingLog);
        let err = history
            .versions(&Company::default(), "c1")
            .expect_err("should surface the storage failure");
        assert!(matches!(err, HistoryError::StorageUnavailable(_)));
    }

    /// Change log serving canned records, for shaping snapshots directly.
    struct StaticLog(Vec<ChangeRecord>);

    impl ChangeLog for StaticLog {
        fn changes_for_entity(
            &self,
            _entity_type: &str,
            _entity_id: &str,
        ) -> Result<Vec<ChangeRecord>, HistoryError> {
            Ok(self.0.clone())
        }
    }

    fn record(id: &str, entity_value: &str) -> ChangeRecord {
        ChangeRecord {
            id: id.to_string(),
            entity_type: "Company".to_string(),
            entity_id: "c1".to_string(),
            author: "alice".to_string(),
            committed_at: 1_000,
            entity_value: entity_value.to_string(),
        }
    }

    #[test]
    fn undecodable_snapshot_fails_fast() {
        let history = VersionHistory::new(StaticLog(vec![record(
            "b",
            r#"{"id":"c1","name":42,"industry":null}"#,
        )]));
        let err = history
            .versions(&Company::default(), "c1")
            .expect_err("a snapshot of the wrong shape is a programmer error");
        assert!(matches!(err, HistoryError::InvalidComparison { .. }));
    }

    #[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
    struct Segment {
        pub id: String,
        pub name: String,
        pub tags: Vec<String>,
    }

    #[test]
    fn reordered_collections_still_match() -> Result<()> {
        // Newest-first, as the store contract requires.
        let history = VersionHistory::new(StaticLog(vec![
            record("b", r#"{"id":"c1","name":"EMEA","tags":["priority","sales","emea"]}"#),
            record("a", r#"{"id":"c1","name":"EMEA","tags":["sales"]}"#),
        ]));

        let current = Segment {
            id: "c1".to_string(),
            name: "EMEA".to_string(),
            tags: vec!["sales".to_string(), "emea".to_string(), "priority".to_string()],
        };

        let versions = history.versions(&current, "c1")?;
        assert_eq!(versions.len(), 2);
        assert!(!versions[0].is_current_version);
        assert!(versions[1].is_current_version);
        Ok(())
    }
}
