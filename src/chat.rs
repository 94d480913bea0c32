//! Chat sessions and their append-only message logs
//!
//! Per scope at most one session is active. Messages addressed to no session,
//! to `"default"`, or to a session that does not exist go to the active one,
//! which is created on demand.

use crate::config::Settings;
use crate::db::{ChatMessage, ChatSession, Database, NewChatMessage};
use crate::document::ChatEntry;
use crate::error::Result;
use crate::normalize::{now, timestamp_or, truncate_chars};
use crate::store::StoragePort;
use crate::types::{ChatRole, Scope};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Session id clients send when they mean "whatever is active"
pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendedMessage {
    pub message_id: i32,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// None when the batch was empty and no session was touched
    pub session_id: Option<String>,
    pub added: usize,
    pub skipped: usize,
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Deactivate every session in the scope and insert a new active one
pub(crate) fn create_session(
    store: &mut dyn StoragePort,
    settings: &Settings,
    scope: Scope,
    title: Option<&str>,
    now: i64,
) -> Result<String> {
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(settings.default_session_title.as_str());
    let session_id = new_session_id();
    store.deactivate_sessions(scope, now)?;
    store.insert_session(scope, &session_id, title, true, now)?;
    info!(%scope, %session_id, "created chat session '{}'", title);
    Ok(session_id)
}

/// Pick the session a message should land in, creating one if needed
pub(crate) fn resolve_session(
    store: &mut dyn StoragePort,
    settings: &Settings,
    scope: Scope,
    requested: Option<&str>,
    now: i64,
) -> Result<String> {
    let requested = requested.map(str::trim).filter(|s| !s.is_empty() && *s != DEFAULT_SESSION);
    if let Some(session_id) = requested {
        if store.get_session(scope, session_id)?.is_some() {
            return Ok(session_id.to_string());
        }
        debug!(%scope, session_id, "unknown chat session, routing to active session");
    }
    match store.active_session(scope)? {
        Some(active) => Ok(active.session_id),
        None => create_session(store, settings, scope, None, now),
    }
}

/// One message as a caller hands it in
#[derive(Debug, Clone, Copy)]
pub struct IncomingMessage<'a> {
    /// Target session; empty, `"default"` or unknown means the active one
    pub session_id: Option<&'a str>,
    pub role: &'a str,
    pub content: &'a str,
    pub timestamp: Option<&'a Value>,
}

/// Append one message. No duplicate check: a single append is one user action.
pub(crate) fn append_message(
    store: &mut dyn StoragePort,
    settings: &Settings,
    scope: Scope,
    message: &IncomingMessage,
    now: i64,
) -> Result<AppendedMessage> {
    let role: ChatRole = message.role.parse()?;
    let session_id = resolve_session(store, settings, scope, message.session_id, now)?;
    let message_id = store.insert_message(&NewChatMessage {
        project_id: scope.project_id,
        user_id: scope.user_id,
        session_id: &session_id,
        role: role.as_str(),
        content: truncate_chars(message.content, settings.max_message_length),
        timestamp: timestamp_or(message.timestamp, now),
        created_at: now,
    })?;
    store.touch_session(scope, &session_id, now)?;
    Ok(AppendedMessage { message_id, session_id })
}

/// Append a client chat history, skipping entries already stored verbatim.
/// Entries with no content are ignored; an unknown role rejects the batch.
pub(crate) fn append_batch(
    store: &mut dyn StoragePort,
    settings: &Settings,
    scope: Scope,
    session_id: Option<&str>,
    entries: &[ChatEntry],
    now: i64,
) -> Result<BatchOutcome> {
    let entries: Vec<&ChatEntry> = entries.iter().filter(|e| !e.content.trim().is_empty()).collect();
    if entries.is_empty() {
        return Ok(BatchOutcome::default());
    }

    let session_id = resolve_session(store, settings, scope, session_id, now)?;
    let mut outcome = BatchOutcome {
        session_id: None,
        added: 0,
        skipped: 0,
    };
    for entry in entries {
        let role: ChatRole = entry.role.parse()?;
        let row = NewChatMessage {
            project_id: scope.project_id,
            user_id: scope.user_id,
            session_id: &session_id,
            role: role.as_str(),
            content: truncate_chars(&entry.content, settings.max_message_length),
            timestamp: timestamp_or(Some(&entry.timestamp), now),
            created_at: now,
        };
        if store.message_exists(&row)? {
            outcome.skipped += 1;
            continue;
        }
        store.insert_message(&row)?;
        outcome.added += 1;
    }
    if outcome.added > 0 {
        store.touch_session(scope, &session_id, now)?;
    }
    if outcome.skipped > 0 {
        debug!(%scope, %session_id, skipped = outcome.skipped, "skipped duplicate chat messages");
    }
    outcome.session_id = Some(session_id);
    Ok(outcome)
}

// ============================================================================
// Database Operations
// ============================================================================

impl Database {
    /// Start a new active session, returning its id
    pub fn create_session(&self, scope: Scope, title: Option<&str>) -> Result<String> {
        self.transaction(|store| create_session(store, self.settings(), scope, title, now()))
    }

    /// Sessions oldest first
    pub fn get_sessions(&self, scope: Scope) -> Result<Vec<ChatSession>> {
        self.with_store(|store| store.list_sessions(scope))
    }

    pub fn get_active_session(&self, scope: Scope) -> Result<Option<ChatSession>> {
        self.with_store(|store| store.active_session(scope))
    }

    /// Make `session_id` the only active session. False if it does not exist.
    pub fn switch_to_session(&self, scope: Scope, session_id: &str) -> bool {
        let result = self.transaction(|store| {
            if store.get_session(scope, session_id)?.is_none() {
                return Ok(false);
            }
            let now = now();
            store.deactivate_sessions(scope, now)?;
            Ok(store.activate_session(scope, session_id, now)? > 0)
        });
        match result {
            Ok(switched) => {
                if switched {
                    info!(%scope, session_id, "switched chat session");
                }
                switched
            }
            Err(e) => {
                warn!(%scope, session_id, "failed to switch chat session: {}", e);
                false
            }
        }
    }

    /// Delete a session and its messages together. False if nothing was deleted.
    pub fn delete_session(&self, scope: Scope, session_id: &str) -> bool {
        let result = self.transaction(|store| {
            let messages = store.delete_messages(scope, session_id)?;
            let sessions = store.delete_session(scope, session_id)?;
            Ok((messages, sessions))
        });
        match result {
            Ok((messages, sessions)) => {
                if sessions > 0 {
                    info!(%scope, session_id, messages, "deleted chat session");
                }
                sessions > 0
            }
            Err(e) => {
                warn!(%scope, session_id, "failed to delete chat session: {}", e);
                false
            }
        }
    }

    pub fn update_session_title(&self, scope: Scope, session_id: &str, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            warn!(%scope, session_id, "refusing to set an empty session title");
            return false;
        }
        match self.with_store(|store| store.rename_session(scope, session_id, title, now())) {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(%scope, session_id, "failed to rename chat session: {}", e);
                false
            }
        }
    }

    /// Messages in timestamp order
    pub fn get_session_messages(&self, scope: Scope, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.with_store(|store| store.list_messages(scope, session_id))
    }

    pub fn append_message(
        &self,
        scope: Scope,
        session_id: Option<&str>,
        role: &str,
        content: &str,
        timestamp: Option<&Value>,
    ) -> Result<AppendedMessage> {
        let message = IncomingMessage {
            session_id,
            role,
            content,
            timestamp,
        };
        self.transaction(|store| append_message(store, self.settings(), scope, &message, now()))
    }

    /// Remove every message in a session, keeping the session itself
    pub fn clear_session_messages(&self, scope: Scope, session_id: &str) -> Result<usize> {
        let removed = self.with_store(|store| store.delete_messages(scope, session_id))?;
        debug!(%scope, session_id, removed, "cleared chat session");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{db_with_settings, scoped_db};
    use crate::error::WriteflowError;
    use serde_json::json;

    fn active_count(db: &Database, scope: Scope) -> usize {
        db.get_sessions(scope).unwrap().iter().filter(|s| s.is_active).count()
    }

    #[test]
    fn test_append_without_session_creates_one() {
        let (_dir, db, scope) = scoped_db();
        let appended = db
            .append_message(scope, None, "user", "hi", Some(&json!(1_700_000_000)))
            .unwrap();

        let active = db.get_active_session(scope).unwrap().unwrap();
        assert_eq!(active.session_id, appended.session_id);
        assert_eq!(active.title, "New Chat");

        let messages = db.get_session_messages(scope, &appended.session_id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[0].timestamp, 1_700_000_000);
    }

    #[test]
    fn test_default_and_unknown_ids_route_to_active() {
        let (_dir, db, scope) = scoped_db();
        let sid = db.create_session(scope, Some("Thesis help")).unwrap();
        let a = db.append_message(scope, Some("default"), "user", "a", None).unwrap();
        let b = db.append_message(scope, Some("no-such-session"), "assistant", "b", None).unwrap();
        assert_eq!(a.session_id, sid);
        assert_eq!(b.session_id, sid);
        assert_eq!(db.get_sessions(scope).unwrap().len(), 1);
    }

    #[test]
    fn test_single_active_session() {
        let (_dir, db, scope) = scoped_db();
        assert_eq!(active_count(&db, scope), 0);
        let first = db.create_session(scope, None).unwrap();
        let second = db.create_session(scope, Some("Second")).unwrap();
        assert_eq!(active_count(&db, scope), 1);
        assert_eq!(db.get_active_session(scope).unwrap().unwrap().session_id, second);

        assert!(db.switch_to_session(scope, &first));
        assert_eq!(active_count(&db, scope), 1);
        assert_eq!(db.get_active_session(scope).unwrap().unwrap().session_id, first);

        assert!(!db.switch_to_session(scope, "missing"));
        assert_eq!(db.get_active_session(scope).unwrap().unwrap().session_id, first);
    }

    #[test]
    fn test_messages_ordered_by_timestamp() {
        let (_dir, db, scope) = scoped_db();
        let sid = db.create_session(scope, None).unwrap();
        db.append_message(scope, Some(&sid), "user", "late", Some(&json!(1_700_000_500_000i64)))
            .unwrap();
        db.append_message(scope, Some(&sid), "user", "early", Some(&json!("2023-11-14T22:13:20Z")))
            .unwrap();
        let contents: Vec<String> = db
            .get_session_messages(scope, &sid)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["early", "late"]);
    }

    #[test]
    fn test_single_append_keeps_repeats() {
        let (_dir, db, scope) = scoped_db();
        let ts = json!(1_700_000_000);
        let first = db.append_message(scope, None, "user", "again", Some(&ts)).unwrap();
        db.append_message(scope, None, "user", "again", Some(&ts)).unwrap();
        assert_eq!(db.get_session_messages(scope, &first.session_id).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_role_is_rejected() {
        let (_dir, db, scope) = scoped_db();
        let err = db.append_message(scope, None, "tool", "x", None).unwrap_err();
        assert!(matches!(err, WriteflowError::Validation(_)));
        // Rejected before any session was created
        assert!(db.get_sessions(scope).unwrap().is_empty());
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let settings = Settings {
            max_message_length: 5,
            ..Settings::default()
        };
        let (_dir, db, scope) = db_with_settings(settings);
        let appended = db.append_message(scope, None, "assistant", "abcdefgh", None).unwrap();
        let messages = db.get_session_messages(scope, &appended.session_id).unwrap();
        assert_eq!(messages[0].content, "abcde");
    }

    #[test]
    fn test_batch_dedups_replays() {
        let (_dir, db, scope) = scoped_db();
        let entries = vec![
            ChatEntry::new("user", "hello", 1_700_000_000),
            ChatEntry::new("assistant", "hi there", 1_700_000_001),
            ChatEntry::new("user", "   ", 1_700_000_002),
        ];
        let first = db
            .transaction(|store| append_batch(store, db.settings(), scope, None, &entries, now()))
            .unwrap();
        assert_eq!((first.added, first.skipped), (2, 0));
        let again = db
            .transaction(|store| append_batch(store, db.settings(), scope, None, &entries, now()))
            .unwrap();
        assert_eq!((again.added, again.skipped), (0, 2));
        assert_eq!(first.session_id, again.session_id);

        let empty = db
            .transaction(|store| append_batch(store, db.settings(), scope, None, &[], now()))
            .unwrap();
        assert_eq!(empty, BatchOutcome::default());
        assert_eq!(db.get_sessions(scope).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_session_removes_messages() {
        let (_dir, db, scope) = scoped_db();
        let appended = db.append_message(scope, None, "user", "bye", None).unwrap();
        assert!(db.delete_session(scope, &appended.session_id));
        assert!(!db.delete_session(scope, &appended.session_id));
        assert!(db.get_session_messages(scope, &appended.session_id).unwrap().is_empty());
        assert!(db.get_active_session(scope).unwrap().is_none());

        // Next default append starts a fresh session
        let next = db.append_message(scope, None, "user", "hello again", None).unwrap();
        assert_ne!(next.session_id, appended.session_id);
    }

    #[test]
    fn test_rename_and_clear() {
        let (_dir, db, scope) = scoped_db();
        let sid = db.create_session(scope, None).unwrap();
        db.append_message(scope, Some(&sid), "user", "one", None).unwrap();
        assert!(db.update_session_title(scope, &sid, "Counterarguments"));
        assert!(!db.update_session_title(scope, &sid, "  "));
        assert!(!db.update_session_title(scope, "missing", "x"));
        assert_eq!(db.get_sessions(scope).unwrap()[0].title, "Counterarguments");

        assert_eq!(db.clear_session_messages(scope, &sid).unwrap(), 1);
        assert!(db.get_session_messages(scope, &sid).unwrap().is_empty());
        assert_eq!(db.get_sessions(scope).unwrap().len(), 1);
    }

    #[test]
    fn test_out_of_range_timestamp_uses_now() {
        let (_dir, db, scope) = scoped_db();
        let before = crate::normalize::now();
        let appended = db
            .append_message(scope, None, "user", "x", Some(&json!(i64::MIN)))
            .unwrap();
        db.append_message(scope, Some(&appended.session_id), "user", "y", Some(&json!(-1e19)))
            .unwrap();

        let messages = db.get_session_messages(scope, &appended.session_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.timestamp >= before));
    }
}
