//! Legacy single-blob storage and its migration into the normalized tables
//!
//! Before normalization a project was one JSON document per scope. Such a
//! scope stays on the blob tier until `migrate` replays the blob through the
//! normal save path and sets the migration flag. `rollback` removes the
//! normalized rows and the flag; the blob itself is never modified by either.

use crate::db::{Database, PurgeCounts};
use crate::document::{ChatEntry, IdeaIdMap, ProjectDocument};
use crate::error::{Result, WriteflowError};
use crate::normalize::{now, timestamp_or};
use crate::project::{require_scope, save_normalized, SaveOutcome};
use crate::store::StoragePort;
use crate::types::{Phase, ProjectStatus, Scope};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Change summary recorded on versions created by a migration
pub const MIGRATION_SUMMARY: &str = "Migrated from legacy data";

/// Rows present for a scope after migration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationCounts {
    pub ideas: usize,
    pub content_phases: usize,
    pub versions: usize,
    pub sessions: usize,
    pub messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub ok: bool,
    pub counts: MigrationCounts,
    /// Normalized rows removed before replaying, on a re-run
    pub replaced: usize,
    pub idea_id_map: IdeaIdMap,
}

pub(crate) fn decode_blob(raw: &str) -> Result<ProjectDocument> {
    serde_json::from_str(raw).map_err(WriteflowError::MalformedLegacyData)
}

fn blob_status(doc: &ProjectDocument) -> ProjectStatus {
    doc.metadata.status.parse().unwrap_or(ProjectStatus::Draft)
}

/// True when the stored blob is marked submitted
pub(crate) fn blob_submitted(store: &mut dyn StoragePort, scope: Scope) -> Result<bool> {
    Ok(blob_status(&read_blob(store, scope)?) == ProjectStatus::Submitted)
}

fn read_blob(store: &mut dyn StoragePort, scope: Scope) -> Result<ProjectDocument> {
    let record = store
        .get_legacy_record(scope)?
        .ok_or_else(|| WriteflowError::NotFound(format!("legacy project data for {}", scope)))?;
    decode_blob(&record.project_data)
}

fn write_blob(store: &mut dyn StoragePort, scope: Scope, doc: &ProjectDocument, now: i64) -> Result<()> {
    let data = serde_json::to_string(doc).map_err(WriteflowError::MalformedLegacyData)?;
    store.upsert_legacy_record(scope, &data, now)?;
    Ok(())
}

/// Load a blob-tier document in the same shape the normalized tier produces
pub(crate) fn load_blob(store: &mut dyn StoragePort, scope: Scope) -> Result<ProjectDocument> {
    let mut doc = read_blob(store, scope)?;
    let fallback = doc.metadata.modified;
    doc.metadata.status = blob_status(&doc).as_str().to_string();
    doc.chat_history = doc
        .chat_history
        .into_iter()
        .map(|entry| {
            let ts = timestamp_or(Some(&entry.timestamp), fallback);
            ChatEntry::new(&entry.role, &entry.content, ts)
        })
        .collect();
    Ok(doc)
}

/// Replace the blob with a new document, keeping its status
pub(crate) fn save_blob(
    store: &mut dyn StoragePort,
    scope: Scope,
    doc: &ProjectDocument,
    now: i64,
) -> Result<SaveOutcome> {
    let previous = read_blob(store, scope)?;
    let status = blob_status(&previous);
    if status == ProjectStatus::Submitted {
        return Err(WriteflowError::ImmutableState);
    }
    let mut next = doc.clone();
    next.metadata.status = status.as_str().to_string();
    next.metadata.created = previous.metadata.created;
    next.metadata.modified = now;
    write_blob(store, scope, &next, now)?;
    Ok(SaveOutcome {
        ok: true,
        ..SaveOutcome::default()
    })
}

/// Set the blob's status. Returns true when it changed.
pub(crate) fn set_blob_status(
    store: &mut dyn StoragePort,
    scope: Scope,
    status: ProjectStatus,
    now: i64,
) -> Result<bool> {
    let mut doc = read_blob(store, scope)?;
    let changed = blob_status(&doc) != status;
    doc.metadata.status = status.as_str().to_string();
    doc.metadata.modified = now;
    write_blob(store, scope, &doc, now)?;
    Ok(changed)
}

fn count_rows(store: &mut dyn StoragePort, scope: Scope) -> Result<MigrationCounts> {
    let mut counts = MigrationCounts {
        ideas: store.list_ideas(scope)?.len(),
        ..MigrationCounts::default()
    };
    for phase in Phase::ALL {
        if store.get_content(scope, *phase)?.is_some() {
            counts.content_phases += 1;
        }
        counts.versions += store.count_versions(scope, *phase)? as usize;
    }
    for session in store.list_sessions(scope)? {
        counts.sessions += 1;
        counts.messages += store.list_messages(scope, &session.session_id)?.len();
    }
    Ok(counts)
}

// ============================================================================
// Database Operations
// ============================================================================

impl Database {
    /// Store (or replace) the legacy blob for a scope
    pub fn import_legacy_blob(&self, scope: Scope, raw: &str) -> Result<()> {
        let value: Value = serde_json::from_str(raw).map_err(WriteflowError::MalformedLegacyData)?;
        if !value.is_object() {
            return Err(WriteflowError::Validation(
                "legacy project data must be a JSON object".to_string(),
            ));
        }
        self.transaction(|store| {
            require_scope(store, scope)?;
            store.upsert_legacy_record(scope, raw, now())?;
            Ok(())
        })?;
        info!(%scope, bytes = raw.len(), "imported legacy project data");
        Ok(())
    }

    /// Replay the legacy blob into the normalized tables and flag the scope as
    /// migrated. Re-running replaces whatever a previous run wrote.
    pub fn migrate(&self, scope: Scope) -> Result<MigrationReport> {
        let result = self.transaction(|store| {
            require_scope(store, scope)?;
            let doc = read_blob(store, scope)?;
            let now = now();

            let replaced = store.delete_scope_rows(scope)?.total();
            let outcome = save_normalized(store, self.settings(), scope, &doc, MIGRATION_SUMMARY, now)?;
            if blob_status(&doc) == ProjectStatus::Submitted {
                store.set_status(scope, ProjectStatus::Submitted, now)?;
            }
            store.set_migrated(scope, now)?;

            Ok(MigrationReport {
                ok: true,
                counts: count_rows(store, scope)?,
                replaced,
                idea_id_map: outcome.idea_id_map,
            })
        });
        match &result {
            Ok(report) => info!(%scope, replaced = report.replaced, "migrated legacy project: {:?}", report.counts),
            Err(e) => warn!(%scope, "legacy migration rolled back: {}", e),
        }
        result
    }

    /// Undo a migration: drop the normalized rows and the flag, keep the blob
    pub fn rollback(&self, scope: Scope) -> Result<PurgeCounts> {
        let counts = self.transaction(|store| store.delete_scope_rows(scope))?;
        info!(%scope, removed = counts.total(), "rolled back legacy migration");
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::scoped_db;
    use crate::store::StorageTier;

    const BLOB: &str = r#"{
        "metadata": {"title": "Old essay", "currentTab": "edit", "status": "draft", "created": 1600000000},
        "plan": {
            "ideas": [
                {"id": "i1", "content": "Old idea", "location": "brainstorm"},
                {"id": "i2", "content": "Intro point", "location": "outline", "sectionId": "intro"}
            ],
            "outline": [{"id": "intro"}]
        },
        "write": {"content": "Some draft text", "wordCount": 3},
        "chatHistory": [{"role": "user", "content": "hello", "timestamp": 1600000100000}]
    }"#;

    fn tier(db: &Database, scope: Scope) -> StorageTier {
        db.with_store(|store| store.storage_tier(scope)).unwrap()
    }

    #[test]
    fn test_import_rejects_malformed_json() {
        let (_dir, db, scope) = scoped_db();
        let err = db.import_legacy_blob(scope, "{not json").unwrap_err();
        assert!(matches!(err, WriteflowError::MalformedLegacyData(_)));
        let err = db.import_legacy_blob(scope, "[1, 2]").unwrap_err();
        assert!(matches!(err, WriteflowError::Validation(_)));
        assert_eq!(tier(&db, scope), StorageTier::Normalized);
    }

    #[test]
    fn test_blob_tier_load_and_save() {
        let (_dir, db, scope) = scoped_db();
        db.import_legacy_blob(scope, BLOB).unwrap();
        assert_eq!(tier(&db, scope), StorageTier::LegacyBlob);

        let mut doc = db.load_project(scope).unwrap();
        assert_eq!(doc.metadata.title, "Old essay");
        assert_eq!(doc.chat_history[0].timestamp, serde_json::json!(1_600_000_100));

        doc.metadata.title = "Still old".to_string();
        let outcome = db.save_project(scope, &doc).unwrap();
        assert!(outcome.idea_id_map.is_empty());
        assert_eq!(db.load_project(scope).unwrap().metadata.title, "Still old");
        // Nothing reached the normalized tables
        assert!(db.list_ideas(scope).unwrap().is_empty());
    }

    #[test]
    fn test_migrate_replays_blob() {
        let (_dir, db, scope) = scoped_db();
        db.import_legacy_blob(scope, BLOB).unwrap();
        let report = db.migrate(scope).unwrap();
        assert!(report.ok);
        assert_eq!(
            report.counts,
            MigrationCounts {
                ideas: 2,
                content_phases: 1,
                versions: 1,
                sessions: 1,
                messages: 1,
            }
        );
        assert_eq!(tier(&db, scope), StorageTier::Normalized);

        let doc = db.load_project(scope).unwrap();
        assert_eq!(doc.metadata.title, "Old essay");
        assert_eq!(doc.metadata.current_tab, "edit");
        assert_eq!(doc.write.content, "Some draft text");
        assert_eq!(doc.plan.outline, serde_json::json!([{"id": "intro"}]));
        let version = db.get_version(scope, Phase::Write, 1).unwrap().unwrap();
        assert_eq!(version.change_summary, MIGRATION_SUMMARY);
    }

    #[test]
    fn test_migrate_is_rerunnable() {
        let (_dir, db, scope) = scoped_db();
        db.import_legacy_blob(scope, BLOB).unwrap();
        let first = db.migrate(scope).unwrap();
        let second = db.migrate(scope).unwrap();
        assert_eq!(first.counts, second.counts);
        assert!(second.replaced > 0);
    }

    #[test]
    fn test_rollback_restores_blob_tier() {
        let (_dir, db, scope) = scoped_db();
        db.import_legacy_blob(scope, BLOB).unwrap();
        db.migrate(scope).unwrap();

        let removed = db.rollback(scope).unwrap();
        assert_eq!(removed.ideas, 2);
        assert_eq!(removed.migration_flags, 1);
        assert_eq!(tier(&db, scope), StorageTier::LegacyBlob);
        assert_eq!(db.load_project(scope).unwrap().metadata.title, "Old essay");
    }

    #[test]
    fn test_malformed_blob_fails_migration() {
        let (_dir, db, scope) = scoped_db();
        db.with_store(|store| store.upsert_legacy_record(scope, "{\"plan\": {\"ideas\": 5}}", 1))
            .unwrap();
        let err = db.migrate(scope).unwrap_err();
        assert!(matches!(err, WriteflowError::MalformedLegacyData(_)));
        assert_eq!(tier(&db, scope), StorageTier::LegacyBlob);
    }

    #[test]
    fn test_submitted_blob_stays_submitted() {
        let (_dir, db, scope) = scoped_db();
        db.import_legacy_blob(scope, BLOB).unwrap();
        assert!(db.submit_project(scope).unwrap());
        let doc = db.load_project(scope).unwrap();
        assert!(matches!(
            db.save_project(scope, &doc).unwrap_err(),
            WriteflowError::ImmutableState
        ));

        db.migrate(scope).unwrap();
        assert_eq!(db.load_project(scope).unwrap().metadata.status, "submitted");
        assert!(db.reopen_project(scope).unwrap());
    }

    #[test]
    fn test_migrate_without_blob_is_not_found() {
        let (_dir, db, scope) = scoped_db();
        assert!(matches!(db.migrate(scope).unwrap_err(), WriteflowError::NotFound(_)));
    }
}
