//! Phase content and version history
//!
//! Each (scope, phase) has exactly one current content row. Snapshots go to
//! `content_versions` when the save is the first one, a manual save, a
//! restore, or an auto-save whose word count moved by at least the configured
//! delta. Version numbers only ever grow; pruning removes the lowest numbers.

use crate::config::Settings;
use crate::db::{ContentVersion, Database, NewContentVersion, NewPhaseContent};
use crate::error::{Result, WriteflowError};
use crate::normalize::now;
use crate::project::require_editable;
use crate::store::StoragePort;
use crate::types::{Phase, Scope};
use tracing::{debug, info};

pub const AUTO_SAVE: &str = "Auto-saved";
pub const MANUAL_SAVE: &str = "Manual save";

/// One content write
#[derive(Debug, Clone, Copy)]
pub struct ContentSave<'a> {
    pub phase: Phase,
    pub content: &'a str,
    pub word_count: i32,
    pub change_summary: &'a str,
    pub modified_by: i32,
}

impl<'a> ContentSave<'a> {
    pub fn new(phase: Phase, content: &'a str, word_count: i32, change_summary: &'a str, modified_by: i32) -> Self {
        Self {
            phase,
            content,
            word_count: word_count.max(0),
            change_summary,
            modified_by,
        }
    }
}

/// Upsert the content row and snapshot when warranted.
/// Returns the new version number when a snapshot was taken.
pub(crate) fn save_content(
    store: &mut dyn StoragePort,
    settings: &Settings,
    scope: Scope,
    save: &ContentSave,
    now: i64,
    force_snapshot: bool,
) -> Result<Option<i32>> {
    let existing = store.get_content(scope, save.phase)?;

    let snapshot = match &existing {
        None => true,
        Some(_) if force_snapshot || save.change_summary == MANUAL_SAVE => true,
        Some(prior) => {
            prior.content != save.content && (save.word_count - prior.word_count).abs() >= settings.snapshot_word_delta
        }
    };

    match &existing {
        Some(prior) => store.update_content(prior.id, save.content, save.word_count, now)?,
        None => {
            store.insert_content(&NewPhaseContent {
                project_id: scope.project_id,
                user_id: scope.user_id,
                phase: save.phase.as_str(),
                content: save.content,
                word_count: save.word_count,
                created_at: now,
                modified_at: now,
            })?;
        }
    }

    if !snapshot {
        return Ok(None);
    }
    append_version(store, settings, scope, save, now).map(Some)
}

fn append_version(
    store: &mut dyn StoragePort,
    settings: &Settings,
    scope: Scope,
    save: &ContentSave,
    now: i64,
) -> Result<i32> {
    let version_number = store.latest_version_number(scope, save.phase)?.unwrap_or(0) + 1;
    store.insert_version(&NewContentVersion {
        project_id: scope.project_id,
        user_id: scope.user_id,
        phase: save.phase.as_str(),
        version_number,
        content: save.content,
        word_count: save.word_count,
        change_summary: save.change_summary,
        created_at: now,
        modified_by: save.modified_by,
    })?;
    debug!(%scope, phase = %save.phase, version_number, "snapshot: {}", save.change_summary);

    let surplus = store.count_versions(scope, save.phase)? - settings.max_versions;
    if surplus > 0 {
        let pruned = store.delete_oldest_versions(scope, save.phase, surplus)?;
        debug!(%scope, phase = %save.phase, pruned, "pruned old versions");
    }
    Ok(version_number)
}

// ============================================================================
// Database Operations
// ============================================================================

impl Database {
    /// Save one phase outside a project save. Returns the snapshot number if any.
    pub fn save_content(
        &self,
        scope: Scope,
        phase: Phase,
        content: &str,
        word_count: i32,
        change_summary: &str,
    ) -> Result<Option<i32>> {
        let save = ContentSave::new(phase, content, word_count, change_summary, scope.user_id);
        self.transaction(|store| {
            require_editable(store, scope)?;
            save_content(store, self.settings(), scope, &save, now(), false)
        })
    }

    /// Versions for one phase, newest first
    pub fn get_version_history(&self, scope: Scope, phase: Phase, limit: Option<i64>) -> Result<Vec<ContentVersion>> {
        self.with_store(|store| store.list_versions(scope, phase, limit.filter(|n| *n > 0)))
    }

    pub fn get_version(&self, scope: Scope, phase: Phase, version_number: i32) -> Result<Option<ContentVersion>> {
        self.with_store(|store| store.get_version(scope, phase, version_number))
    }

    /// Copy a snapshot back into the current content and record that as a new
    /// version. Returns the new version number.
    pub fn restore_version(&self, scope: Scope, phase: Phase, version_number: i32) -> Result<i32> {
        let restored = self.transaction(|store| {
            require_editable(store, scope)?;
            let version = store.get_version(scope, phase, version_number)?.ok_or_else(|| {
                WriteflowError::NotFound(format!("{} version {} for {}", phase, version_number, scope))
            })?;
            let summary = format!("Restored from version {}", version_number);
            let save = ContentSave::new(phase, &version.content, version.word_count, &summary, scope.user_id);
            let created = save_content(store, self.settings(), scope, &save, now(), true)?;
            created.ok_or_else(|| WriteflowError::Conflict("restore did not record a version".into()))
        })?;
        info!(%scope, %phase, from = version_number, to = restored, "restored version");
        Ok(restored)
    }
}
