//! writeflow - persistence and versioning for guided writing projects
//!
//! Stores a learner's project (brainstormed ideas, an outline, drafted and
//! edited text, and AI chat transcripts) in normalized SQLite tables, keyed
//! by `(project_id, user_id)`.
//!
//! # Overview
//!
//! The editor holds the whole project as one nested JSON document and sends
//! it back in full on every save. writeflow reconciles that document against
//! the stored rows without ever losing learner work:
//!
//! | Part | Behaviour |
//! |------|-----------|
//! | ideas | matched by persisted id, then by normalized content; never deleted implicitly |
//! | write / edit | one current row per phase plus a capped, auto-snapshotting version history |
//! | chat | independent sessions, one active at a time, append-only logs |
//! | metadata | title, goal, tab, outline blob and draft/submitted status |
//!
//! Scopes still on the pre-normalization single-blob format are served from
//! that blob until `migrate` moves them over.
//!
//! # Quick Start
//!
//! ```no_run
//! use writeflow::{Database, ProjectDocument, Scope};
//!
//! let db = Database::open_at("writeassist.db").unwrap();
//! let project_id = db.register_activity("Persuasive essay", "Argue one side.").unwrap();
//! let user_id = db.register_learner("Ada").unwrap();
//! let scope = Scope::new(project_id, user_id);
//!
//! let mut doc = db.load_project(scope).unwrap();
//! doc.write.content = "<p>Cities were built for cars.</p>".to_string();
//! doc.write.word_count = 5;
//! let saved = db.save_project(scope, &doc).unwrap();
//! println!("ideas remapped: {:?}", saved.idea_id_map);
//! ```

pub mod chat;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod ideas;
pub mod init;
pub mod legacy;
pub mod normalize;
pub mod project;
pub mod schema;
pub mod store;
pub mod types;
pub mod versions;

pub use chat::{AppendedMessage, BatchOutcome, IncomingMessage, DEFAULT_SESSION};
pub use config::{Config, Settings};
pub use db::{
    Activity, ChatMessage, ChatSession, ContentVersion, Database, Idea, PurgeCounts, CURRENT_SCHEMA,
};
pub use document::{ChatEntry, IdeaDocument, IdeaIdMap, PhaseDocument, PlanDocument, ProjectDocument};
pub use error::{Result, WriteflowError};
pub use ideas::IdeaMatch;
pub use legacy::{MigrationCounts, MigrationReport};
pub use project::SaveOutcome;
pub use store::{SqliteStore, StoragePort, StorageTier};
pub use types::{ChatRole, CurrentTab, IdeaLocation, Phase, ProjectStatus, Scope};
pub use versions::{AUTO_SAVE, MANUAL_SAVE};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = CURRENT_SCHEMA;
        assert_eq!(Phase::ALL.len(), 2);
        assert_eq!(MANUAL_SAVE, "Manual save");
    }
}
