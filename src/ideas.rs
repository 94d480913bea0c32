//! Idea reconciliation
//!
//! The client sends its whole idea list on every save, possibly built from a
//! stale load. Each client idea is matched to a stored row by persisted id,
//! then by normalized content within its (location, section) bucket, and only
//! inserted when neither matches. Ideas missing from the list are never
//! deleted here; removal is always an explicit request.

use crate::db::{Database, Idea, IdeaChangeset, NewIdea};
use crate::document::{IdeaDocument, IdeaIdMap};
use crate::error::Result;
use crate::normalize::{normalize_content, now};
use crate::project::require_editable;
use crate::store::StoragePort;
use crate::types::{IdeaLocation, Scope};
use tracing::{debug, warn};

/// How a client idea was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeaMatch {
    /// Persisted id found under this scope
    ById(i32),
    /// Same normalized content already stored in the same bucket
    ByContent(i32),
    Inserted(i32),
}

impl IdeaMatch {
    pub fn id(&self) -> i32 {
        match *self {
            IdeaMatch::ById(id) | IdeaMatch::ByContent(id) | IdeaMatch::Inserted(id) => id,
        }
    }
}

/// Upsert one client idea
pub(crate) fn upsert_idea(store: &mut dyn StoragePort, scope: Scope, idea: &IdeaDocument, now: i64) -> Result<IdeaMatch> {
    let section = idea.effective_section();
    let changes = IdeaChangeset {
        content: &idea.content,
        location: idea.location.as_str(),
        section_id: section,
        ai_generated: idea.ai_generated,
        modified_at: now,
    };

    if let Some(persisted) = idea.id.as_deref().and_then(|raw| raw.trim().parse::<i32>().ok()) {
        if store.get_idea(scope, persisted)?.is_some() {
            store.update_idea(persisted, &changes)?;
            return Ok(IdeaMatch::ById(persisted));
        }
    }

    let normalized = normalize_content(&idea.content);
    let duplicate = store
        .ideas_in_bucket(scope, idea.location, section)?
        .into_iter()
        .find(|existing| normalize_content(&existing.content) == normalized);
    if let Some(existing) = duplicate {
        debug!(idea_id = existing.id, "client idea {:?} matched stored idea by content", idea.id);
        store.update_idea(existing.id, &changes)?;
        return Ok(IdeaMatch::ByContent(existing.id));
    }

    let id = store.insert_idea(&NewIdea {
        project_id: scope.project_id,
        user_id: scope.user_id,
        content: &idea.content,
        location: idea.location.as_str(),
        section_id: section,
        ai_generated: idea.ai_generated,
        created_at: now,
        modified_at: now,
    })?;
    Ok(IdeaMatch::Inserted(id))
}

/// Reconcile a full client idea list, returning client id -> persisted id.
/// Ideas with no visible text are skipped.
pub(crate) fn reconcile_ideas(
    store: &mut dyn StoragePort,
    scope: Scope,
    ideas: &[IdeaDocument],
    now: i64,
) -> Result<IdeaIdMap> {
    let mut id_map = IdeaIdMap::new();
    for idea in ideas {
        if normalize_content(&idea.content).is_empty() {
            debug!("skipping empty idea {:?}", idea.id);
            continue;
        }
        let matched = upsert_idea(store, scope, idea, now)?;
        if let Some(client_id) = idea.id.as_deref() {
            id_map.insert(client_id.to_string(), matched.id());
        }
    }
    Ok(id_map)
}

/// Find the idea a (content, location, section) triple refers to: exact stored
/// content first, then a normalized comparison over every idea in the scope.
pub(crate) fn find_by_fields(
    store: &mut dyn StoragePort,
    scope: Scope,
    content: &str,
    location: IdeaLocation,
    section_id: Option<&str>,
) -> Result<Option<Idea>> {
    let section = match location {
        IdeaLocation::Brainstorm => None,
        IdeaLocation::Outline => section_id.map(str::trim).filter(|s| !s.is_empty()),
    };

    if let Some(exact) = store.ideas_with_content(scope, content, location, section)?.into_iter().next() {
        return Ok(Some(exact));
    }

    // TODO: index normalized content so this does not scan every idea in the scope
    let wanted = normalize_content(content);
    let fuzzy = store.list_ideas(scope)?.into_iter().find(|idea| {
        idea.location == location.as_str()
            && idea.section_id.as_deref() == section
            && normalize_content(&idea.content) == wanted
    });
    if fuzzy.is_some() {
        debug!("idea matched by normalized content after exact match failed");
    }
    Ok(fuzzy)
}

// ============================================================================
// Database Operations
// ============================================================================

impl Database {
    /// Reconcile a client idea list in its own transaction
    pub fn save_ideas(&self, scope: Scope, ideas: &[IdeaDocument]) -> Result<IdeaIdMap> {
        self.transaction(|store| {
            require_editable(store, scope)?;
            reconcile_ideas(store, scope, ideas, now())
        })
    }

    pub fn list_ideas(&self, scope: Scope) -> Result<Vec<Idea>> {
        self.with_store(|store| store.list_ideas(scope))
    }

    /// Delete one idea by persisted id. Returns false when nothing was deleted.
    pub fn delete_idea(&self, scope: Scope, idea_id: i32) -> bool {
        let result = self.transaction(|store| {
            require_editable(store, scope)?;
            store.delete_idea(scope, idea_id)
        });
        match result {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(idea_id, "failed to delete idea: {}", e);
                false
            }
        }
    }

    /// Delete the idea matching the given fields. Returns false when no idea
    /// matched or the location is not a known value.
    pub fn delete_idea_by_fields(&self, scope: Scope, content: &str, location: &str, section_id: Option<&str>) -> bool {
        let location = match location.parse::<IdeaLocation>() {
            Ok(location) => location,
            Err(e) => {
                warn!("delete by fields rejected: {}", e);
                return false;
            }
        };
        let result = self.transaction(|store| {
            require_editable(store, scope)?;
            match find_by_fields(store, scope, content, location, section_id)? {
                Some(idea) => Ok(store.delete_idea(scope, idea.id)? > 0),
                None => Ok(false),
            }
        });
        match result {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("failed to delete idea by fields: {}", e);
                false
            }
        }
    }
}
