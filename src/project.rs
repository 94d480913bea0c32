//! Project aggregate: load, save, submit, reopen
//!
//! A save is one transaction covering metadata, ideas, both content phases
//! and the chat history, applied in that order. Which tables it touches
//! depends on the scope's storage tier, decided once per call.

use crate::chat::append_batch;
use crate::config::Settings;
use crate::db::{Database, MetadataChangeset, NewProjectMetadata, ProjectMetadata};
use crate::document::{
    ChatEntry, DocumentMetadata, IdeaDocument, IdeaIdMap, OutlineBlob, PhaseDocument, ProjectDocument,
};
use crate::error::{Result, WriteflowError};
use crate::ideas::reconcile_ideas;
use crate::legacy;
use crate::normalize::{epoch_seconds, now};
use crate::store::{StoragePort, StorageTier};
use crate::types::{CurrentTab, IdeaLocation, Phase, ProjectStatus, Scope};
use crate::versions::{save_content, ContentSave, AUTO_SAVE};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What a project save wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub ok: bool,
    /// Client idea id -> persisted idea id
    pub idea_id_map: IdeaIdMap,
    pub versions_created: usize,
    pub messages_added: usize,
    pub messages_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_session_id: Option<String>,
}

/// Fail with `NotFound` unless both host rows exist
pub(crate) fn require_scope(store: &mut dyn StoragePort, scope: Scope) -> Result<()> {
    if !store.activity_exists(scope.project_id)? {
        return Err(WriteflowError::NotFound(format!("activity {}", scope.project_id)));
    }
    if !store.learner_exists(scope.user_id)? {
        return Err(WriteflowError::NotFound(format!("learner {}", scope.user_id)));
    }
    Ok(())
}

fn is_submitted(metadata: &ProjectMetadata) -> bool {
    metadata.status == ProjectStatus::Submitted.as_str()
}

/// Fail with `ImmutableState` while the project is submitted, in either tier
pub(crate) fn require_editable(store: &mut dyn StoragePort, scope: Scope) -> Result<()> {
    let submitted = match store.storage_tier(scope)? {
        StorageTier::Normalized => store.get_metadata(scope)?.as_ref().is_some_and(is_submitted),
        StorageTier::LegacyBlob => legacy::blob_submitted(store, scope)?,
    };
    if submitted {
        return Err(WriteflowError::ImmutableState);
    }
    Ok(())
}

// ============================================================================
// Load
// ============================================================================

/// Assemble the document from the normalized tables. `chat_history` is the
/// active session's log only; messages in other sessions are reachable
/// through `Database::get_session_messages`.
pub(crate) fn load_normalized(store: &mut dyn StoragePort, scope: Scope) -> Result<ProjectDocument> {
    let mut doc = ProjectDocument::default();

    match store.get_metadata(scope)? {
        Some(row) => {
            doc.metadata = DocumentMetadata {
                title: row.title,
                description: row.description,
                current_tab: CurrentTab::from_stored(&row.current_tab).as_str().to_string(),
                instructor_instructions: row.instructor_instructions,
                goal: row.goal,
                status: row.status,
                created: row.created_at,
                modified: row.modified_at,
            };
            OutlineBlob::decode(row.plan_outline.as_deref()).apply_to(&mut doc.plan);
        }
        None => {
            if let Some(activity) = store.get_activity(scope.project_id)? {
                doc.metadata.instructor_instructions = activity.instructions;
            }
        }
    }

    doc.plan.ideas = store
        .list_ideas(scope)?
        .into_iter()
        .map(|idea| {
            let location = idea.location.parse::<IdeaLocation>().unwrap_or_else(|_| {
                warn!(idea_id = idea.id, "stored idea has unknown location '{}'", idea.location);
                IdeaLocation::Brainstorm
            });
            IdeaDocument {
                id: Some(idea.id.to_string()),
                content: idea.content,
                location,
                section_id: idea.section_id,
                ai_generated: idea.ai_generated,
            }
        })
        .collect();

    for phase in Phase::ALL {
        if let Some(row) = store.get_content(scope, *phase)? {
            *doc.phase_mut(*phase) = PhaseDocument {
                content: row.content,
                word_count: row.word_count,
            };
        }
    }

    if let Some(session) = store.active_session(scope)? {
        doc.chat_history = store
            .list_messages(scope, &session.session_id)?
            .into_iter()
            .map(|m| ChatEntry::new(&m.role, &m.content, epoch_seconds(m.timestamp)))
            .collect();
        doc.chat_session_id = Some(session.session_id);
    }

    Ok(doc)
}

// ============================================================================
// Save
// ============================================================================

/// Write a document into the normalized tables. Status is never changed here.
pub(crate) fn save_normalized(
    store: &mut dyn StoragePort,
    settings: &Settings,
    scope: Scope,
    doc: &ProjectDocument,
    change_summary: &str,
    now: i64,
) -> Result<SaveOutcome> {
    let meta = &doc.metadata;
    let current_tab = CurrentTab::from_stored(&meta.current_tab);
    let outline = OutlineBlob::from_plan(&doc.plan).encode();

    match store.get_metadata(scope)? {
        Some(existing) => store.update_metadata(
            existing.id,
            &MetadataChangeset {
                title: &meta.title,
                description: &meta.description,
                current_tab: current_tab.as_str(),
                instructor_instructions: &meta.instructor_instructions,
                goal: &meta.goal,
                plan_outline: Some(&outline),
                modified_at: now,
            },
        )?,
        None => {
            store.insert_metadata(&NewProjectMetadata {
                project_id: scope.project_id,
                user_id: scope.user_id,
                title: &meta.title,
                description: &meta.description,
                current_tab: current_tab.as_str(),
                instructor_instructions: &meta.instructor_instructions,
                goal: &meta.goal,
                status: ProjectStatus::Draft.as_str(),
                plan_outline: Some(&outline),
                created_at: if meta.created > 0 { meta.created } else { now },
                modified_at: now,
            })?;
        }
    }

    let idea_id_map = reconcile_ideas(store, scope, &doc.plan.ideas, now)?;

    let mut versions_created = 0;
    for phase in Phase::ALL {
        let text = doc.phase(*phase);
        let never_saved = store.get_content(scope, *phase)?.is_none();
        if never_saved && text.content.trim().is_empty() && text.word_count == 0 {
            continue;
        }
        let save = ContentSave::new(*phase, &text.content, text.word_count, change_summary, scope.user_id);
        if save_content(store, settings, scope, &save, now, false)?.is_some() {
            versions_created += 1;
        }
    }

    let chat = append_batch(
        store,
        settings,
        scope,
        doc.chat_session_id.as_deref(),
        &doc.chat_history,
        now,
    )?;

    Ok(SaveOutcome {
        ok: true,
        idea_id_map,
        versions_created,
        messages_added: chat.added,
        messages_skipped: chat.skipped,
        chat_session_id: chat.session_id,
    })
}

/// Insert a metadata row with defaults, seeded from the activity
fn default_metadata(store: &mut dyn StoragePort, scope: Scope, status: ProjectStatus, now: i64) -> Result<()> {
    let instructions = store
        .get_activity(scope.project_id)?
        .map(|a| a.instructions)
        .unwrap_or_default();
    store.insert_metadata(&NewProjectMetadata {
        project_id: scope.project_id,
        user_id: scope.user_id,
        title: "",
        description: "",
        current_tab: CurrentTab::Plan.as_str(),
        instructor_instructions: &instructions,
        goal: "",
        status: status.as_str(),
        plan_outline: None,
        created_at: now,
        modified_at: now,
    })?;
    Ok(())
}

// ============================================================================
// Database Operations
// ============================================================================

impl Database {
    /// Load the full document. A scope with no data yields defaults.
    /// Chat history covers the active session only.
    pub fn load_project(&self, scope: Scope) -> Result<ProjectDocument> {
        self.with_store(|store| match store.storage_tier(scope)? {
            StorageTier::Normalized => load_normalized(store, scope),
            StorageTier::LegacyBlob => legacy::load_blob(store, scope),
        })
    }

    /// Save as an auto-save
    pub fn save_project(&self, scope: Scope, doc: &ProjectDocument) -> Result<SaveOutcome> {
        self.save_project_with_summary(scope, doc, AUTO_SAVE)
    }

    /// Save the whole document atomically; nothing is written on error
    pub fn save_project_with_summary(
        &self,
        scope: Scope,
        doc: &ProjectDocument,
        change_summary: &str,
    ) -> Result<SaveOutcome> {
        let outcome = self.transaction(|store| {
            let now = now();
            match store.storage_tier(scope)? {
                StorageTier::Normalized => {
                    require_editable(store, scope)?;
                    require_scope(store, scope)?;
                    save_normalized(store, self.settings(), scope, doc, change_summary, now)
                }
                StorageTier::LegacyBlob => {
                    require_scope(store, scope)?;
                    legacy::save_blob(store, scope, doc, now)
                }
            }
        });
        match &outcome {
            Ok(saved) => debug!(
                %scope,
                ideas = saved.idea_id_map.len(),
                versions = saved.versions_created,
                messages = saved.messages_added,
                "saved project"
            ),
            Err(e) => warn!(%scope, "project save rolled back: {}", e),
        }
        outcome
    }

    /// Mark the project submitted. Returns true when it was not already.
    pub fn submit_project(&self, scope: Scope) -> Result<bool> {
        let changed = self.transaction(|store| {
            require_scope(store, scope)?;
            let now = now();
            match store.storage_tier(scope)? {
                StorageTier::LegacyBlob => legacy::set_blob_status(store, scope, ProjectStatus::Submitted, now),
                StorageTier::Normalized => match store.get_metadata(scope)? {
                    Some(existing) => {
                        store.set_status(scope, ProjectStatus::Submitted, now)?;
                        Ok(!is_submitted(&existing))
                    }
                    None => {
                        default_metadata(store, scope, ProjectStatus::Submitted, now)?;
                        Ok(true)
                    }
                },
            }
        })?;
        info!(%scope, changed, "submitted project");
        Ok(changed)
    }

    /// Return a submitted project to draft. False when there is nothing to reopen.
    pub fn reopen_project(&self, scope: Scope) -> Result<bool> {
        let changed = self.transaction(|store| {
            let now = now();
            match store.storage_tier(scope)? {
                StorageTier::LegacyBlob => legacy::set_blob_status(store, scope, ProjectStatus::Draft, now),
                StorageTier::Normalized => match store.get_metadata(scope)? {
                    Some(existing) if is_submitted(&existing) => {
                        Ok(store.set_status(scope, ProjectStatus::Draft, now)? > 0)
                    }
                    _ => Ok(false),
                },
            }
        })?;
        if changed {
            info!(%scope, "reopened project");
        }
        Ok(changed)
    }
}
