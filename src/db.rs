//! SQLite database with Diesel ORM
//!
//! Stores normalized writing-project state: metadata, ideas, phase content with
//! version snapshots, chat sessions and their transcripts.
//! The schema is created by an explicit step when the database is opened,
//! never altered while serving an operation.

use crate::config::{Config, Settings};
use crate::error::{Result, WriteflowError};
use crate::normalize::now;
use crate::schema::*;
use crate::store::{SqliteStore, StoragePort};
use crate::types::Scope;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Walk up directory tree to find .writeflow folder (like git finds .git)
/// Can be overridden with WRITEFLOW_DB_PATH env var
fn get_db_path(config: &Config) -> PathBuf {
    // Check env var first - always takes priority
    if let Ok(path) = std::env::var("WRITEFLOW_DB_PATH") {
        return PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let writeflow_dir = dir.join(".writeflow");
            if writeflow_dir.is_dir() {
                return writeflow_dir.join(config.db_file_name());
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break, // Reached filesystem root
            }
        }
    }

    PathBuf::from(".writeflow").join(config.db_file_name())
}

/// Current schema version for writeflow
pub const CURRENT_SCHEMA: StoreSchema = StoreSchema {
    major: 2,
    minor: 1,
    patch: 0,
    name: "normalized-project-state",
    features: &[
        "project_metadata",
        "project_ideas",
        "project_content",
        "content_versions",
        "chat_sessions",
        "chat_messages",
        "legacy_project_data",
        "migration_state",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct StoreSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl StoreSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for StoreSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

/// Queryable schema version
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = schema_versions)]
pub struct StoredSchema {
    pub id: i32,
    pub version: String,
    pub name: String,
    pub features: String,
    pub introduced_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = activities)]
pub struct NewActivity<'a> {
    pub name: &'a str,
    pub instructions: &'a str,
    pub created_at: i64,
}

/// A writing activity instance owned by the host
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = activities)]
pub struct Activity {
    pub id: i32,
    pub name: String,
    pub instructions: String,
    pub created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = learners)]
pub struct NewLearner<'a> {
    pub display_name: &'a str,
    pub created_at: i64,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = learners)]
pub struct Learner {
    pub id: i32,
    pub display_name: String,
    pub created_at: i64,
}

// ============================================================================
// Project State Models
// ============================================================================

/// Insertable metadata row
#[derive(Insertable)]
#[diesel(table_name = project_metadata)]
pub struct NewProjectMetadata<'a> {
    pub project_id: i32,
    pub user_id: i32,
    pub title: &'a str,
    pub description: &'a str,
    pub current_tab: &'a str,
    pub instructor_instructions: &'a str,
    pub goal: &'a str,
    pub status: &'a str,
    pub plan_outline: Option<&'a str>,
    pub created_at: i64,
    pub modified_at: i64,
}

/// Fields rewritten by every save; status and created_at are left alone
#[derive(AsChangeset)]
#[diesel(table_name = project_metadata)]
#[diesel(treat_none_as_null = true)]
pub struct MetadataChangeset<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub current_tab: &'a str,
    pub instructor_instructions: &'a str,
    pub goal: &'a str,
    pub plan_outline: Option<&'a str>,
    pub modified_at: i64,
}

/// Queryable metadata row
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = project_metadata)]
pub struct ProjectMetadata {
    pub id: i32,
    pub project_id: i32,
    pub user_id: i32,
    pub title: String,
    pub description: String,
    pub current_tab: String,
    pub instructor_instructions: String,
    pub goal: String,
    pub status: String,
    pub plan_outline: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = project_ideas)]
pub struct NewIdea<'a> {
    pub project_id: i32,
    pub user_id: i32,
    pub content: &'a str,
    pub location: &'a str,
    pub section_id: Option<&'a str>,
    pub ai_generated: bool,
    pub created_at: i64,
    pub modified_at: i64,
}

#[derive(AsChangeset)]
#[diesel(table_name = project_ideas)]
#[diesel(treat_none_as_null = true)]
pub struct IdeaChangeset<'a> {
    pub content: &'a str,
    pub location: &'a str,
    pub section_id: Option<&'a str>,
    pub ai_generated: bool,
    pub modified_at: i64,
}

/// Queryable idea row
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = project_ideas)]
pub struct Idea {
    pub id: i32,
    pub project_id: i32,
    pub user_id: i32,
    pub content: String,
    pub location: String,
    pub section_id: Option<String>,
    pub ai_generated: bool,
    pub created_at: i64,
    pub modified_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = project_content)]
pub struct NewPhaseContent<'a> {
    pub project_id: i32,
    pub user_id: i32,
    pub phase: &'a str,
    pub content: &'a str,
    pub word_count: i32,
    pub created_at: i64,
    pub modified_at: i64,
}

/// The single mutable "current" text of one phase
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = project_content)]
pub struct PhaseContent {
    pub id: i32,
    pub project_id: i32,
    pub user_id: i32,
    pub phase: String,
    pub content: String,
    pub word_count: i32,
    pub created_at: i64,
    pub modified_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = content_versions)]
pub struct NewContentVersion<'a> {
    pub project_id: i32,
    pub user_id: i32,
    pub phase: &'a str,
    pub version_number: i32,
    pub content: &'a str,
    pub word_count: i32,
    pub change_summary: &'a str,
    pub created_at: i64,
    pub modified_by: i32,
}

/// Immutable snapshot of a phase's content
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = content_versions)]
pub struct ContentVersion {
    pub id: i32,
    pub project_id: i32,
    pub user_id: i32,
    pub phase: String,
    pub version_number: i32,
    pub content: String,
    pub word_count: i32,
    pub change_summary: String,
    pub created_at: i64,
    pub modified_by: i32,
}

// ============================================================================
// Chat Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = chat_sessions)]
pub struct NewChatSession<'a> {
    pub project_id: i32,
    pub user_id: i32,
    pub session_id: &'a str,
    pub title: &'a str,
    pub is_active: bool,
    pub created_at: i64,
    pub modified_at: i64,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = chat_sessions)]
pub struct ChatSession {
    pub id: i32,
    pub project_id: i32,
    pub user_id: i32,
    pub session_id: String,
    pub title: String,
    pub is_active: bool,
    pub created_at: i64,
    pub modified_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage<'a> {
    pub project_id: i32,
    pub user_id: i32,
    pub session_id: &'a str,
    pub role: &'a str,
    pub content: &'a str,
    pub timestamp: i64,
    pub created_at: i64,
}

#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = chat_messages)]
pub struct ChatMessage {
    pub id: i32,
    pub project_id: i32,
    pub user_id: i32,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: i64,
    pub created_at: i64,
}

// ============================================================================
// Legacy Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = legacy_project_data)]
pub struct NewLegacyRecord<'a> {
    pub project_id: i32,
    pub user_id: i32,
    pub project_data: &'a str,
    pub created_at: i64,
    pub modified_at: i64,
}

/// Pre-normalization single-blob project record
#[derive(Queryable, Selectable, Debug, Clone, Serialize)]
#[diesel(table_name = legacy_project_data)]
pub struct LegacyRecord {
    pub id: i32,
    pub project_id: i32,
    pub user_id: i32,
    pub project_data: String,
    pub created_at: i64,
    pub modified_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = migration_state)]
pub struct NewMigrationState {
    pub project_id: i32,
    pub user_id: i32,
    pub migrated_at: i64,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Pragmas applied to every pooled connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
    settings: Settings,
}

/// Rows removed by a cascade delete, per table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub metadata: usize,
    pub ideas: usize,
    pub content: usize,
    pub versions: usize,
    pub sessions: usize,
    pub messages: usize,
    pub legacy: usize,
    pub migration_flags: usize,
}

impl PurgeCounts {
    pub fn total(&self) -> usize {
        self.metadata
            + self.ideas
            + self.content
            + self.versions
            + self.sessions
            + self.messages
            + self.legacy
            + self.migration_flags
    }
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path(config: &Config) -> PathBuf {
        get_db_path(config)
    }

    /// Open database at default path (respects WRITEFLOW_DB_PATH env var)
    pub fn open(config: &Config) -> Result<Self> {
        let path = get_db_path(config);
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| WriteflowError::Connection(format!("{}: {}", parent.display(), e)))?;
            }
        }
        Self::open_with_settings(&path, config.settings())
    }

    /// Open database at specified path with default settings
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_settings(path, Settings::default())
    }

    pub fn open_with_settings<P: AsRef<Path>>(path: P, settings: Settings) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms: 5_000 }))
            .build(manager)
            .map_err(|e| WriteflowError::Connection(e.to_string()))?;

        let db = Self { pool, settings };
        db.init_schema()?;
        tracing::debug!("opened {} with schema {}", path_str, CURRENT_SCHEMA);
        Ok(db)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| WriteflowError::Connection(e.to_string()))
    }

    /// Run `f` against a store on a pooled connection, outside any transaction
    pub(crate) fn with_store<T>(&self, f: impl FnOnce(&mut dyn StoragePort) -> Result<T>) -> Result<T> {
        let mut conn = self.get_conn()?;
        let mut store = SqliteStore::new(&mut conn);
        f(&mut store)
    }

    /// Run `f` inside one transaction; any `Err` rolls back every write it made
    pub(crate) fn transaction<T>(&self, f: impl FnOnce(&mut dyn StoragePort) -> Result<T>) -> Result<T> {
        let mut pooled = self.get_conn()?;
        let conn: &mut SqliteConnection = &mut pooled;
        conn.transaction::<T, WriteflowError, _>(|conn| {
            let mut store = SqliteStore::new(conn);
            f(&mut store)
        })
    }

    fn init_schema(&self) -> Result<()> {
        let mut pooled = self.get_conn()?;
        let conn: &mut SqliteConnection = &mut pooled;

        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                name TEXT NOT NULL,
                instructions TEXT NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS learners (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                display_name TEXT NOT NULL,
                created_at BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_metadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                project_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                current_tab TEXT NOT NULL DEFAULT 'plan',
                instructor_instructions TEXT NOT NULL DEFAULT '',
                goal TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'draft',
                plan_outline TEXT,
                created_at BIGINT NOT NULL,
                modified_at BIGINT NOT NULL,
                UNIQUE(project_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS project_ideas (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                project_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT 'brainstorm',
                section_id TEXT,
                ai_generated BOOLEAN NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL,
                modified_at BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_content (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                project_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                phase TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                word_count INTEGER NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL,
                modified_at BIGINT NOT NULL,
                UNIQUE(project_id, user_id, phase)
            );

            CREATE TABLE IF NOT EXISTS content_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                project_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                phase TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                content TEXT NOT NULL,
                word_count INTEGER NOT NULL DEFAULT 0,
                change_summary TEXT NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL,
                modified_by INTEGER NOT NULL,
                UNIQUE(project_id, user_id, phase, version_number)
            );

            CREATE TABLE IF NOT EXISTS chat_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                project_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                title TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL,
                modified_at BIGINT NOT NULL,
                UNIQUE(project_id, user_id, session_id)
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                project_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp BIGINT NOT NULL,
                created_at BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS legacy_project_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                project_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                project_data TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                modified_at BIGINT NOT NULL,
                UNIQUE(project_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS migration_state (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                project_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                migrated_at BIGINT NOT NULL,
                UNIQUE(project_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_ideas_scope ON project_ideas(project_id, user_id, location, section_id);
            CREATE INDEX IF NOT EXISTS idx_versions_scope ON content_versions(project_id, user_id, phase, version_number);
            CREATE INDEX IF NOT EXISTS idx_sessions_scope ON chat_sessions(project_id, user_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_messages_session ON chat_messages(project_id, user_id, session_id, timestamp);
            "#,
        )?;

        self.register_schema(conn, &CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, conn: &mut SqliteConnection, schema: &StoreSchema) -> Result<()> {
        let now = chrono::Local::now().to_rfc3339();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(conn)?;

        Ok(())
    }

    /// Schema versions registered in this database, oldest first
    pub fn schema_history(&self) -> Result<Vec<StoredSchema>> {
        let mut conn = self.get_conn()?;
        let rows = schema_versions::table
            .order(schema_versions::id.asc())
            .load::<StoredSchema>(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Host Operations
    // ========================================================================

    /// Register a writing activity instance, returning its project id
    pub fn register_activity(&self, name: &str, instructions: &str) -> Result<i32> {
        self.with_store(|store| store.insert_activity(name, instructions, now()))
    }

    /// Register a learner, returning their user id
    pub fn register_learner(&self, display_name: &str) -> Result<i32> {
        self.with_store(|store| store.insert_learner(display_name, now()))
    }

    pub fn get_activity(&self, project_id: i32) -> Result<Option<Activity>> {
        self.with_store(|store| store.get_activity(project_id))
    }

    /// Delete an activity and every row any learner stored under it
    pub fn delete_activity(&self, project_id: i32) -> Result<PurgeCounts> {
        let counts = self.transaction(|store| {
            let counts = store.delete_project_rows(project_id)?;
            store.delete_activity(project_id)?;
            Ok(counts)
        })?;
        tracing::info!(project_id, removed = counts.total(), "deleted activity");
        Ok(counts)
    }

    /// Delete all normalized rows for one learner's project (legacy blob is kept)
    pub fn purge_scope(&self, project_id: i32, user_id: i32) -> Result<PurgeCounts> {
        let scope = Scope::new(project_id, user_id);
        self.transaction(|store| store.delete_scope_rows(scope))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Fresh database in a temp dir plus one registered (activity, learner) scope
    pub fn scoped_db() -> (TempDir, Database, Scope) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        let project_id = db.register_activity("Persuasive essay", "Argue one side.").unwrap();
        let user_id = db.register_learner("Learner One").unwrap();
        (dir, db, Scope::new(project_id, user_id))
    }

    pub fn db_with_settings(settings: Settings) -> (TempDir, Database, Scope) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_with_settings(dir.path().join("test.db"), settings).unwrap();
        let project_id = db.register_activity("Report", "").unwrap();
        let user_id = db.register_learner("Learner Two").unwrap();
        (dir, db, Scope::new(project_id, user_id))
    }
}
