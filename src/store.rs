//! Entity store: typed CRUD primitives per table
//!
//! `StoragePort` is the seam every component talks to. It carries no business
//! rules; callers look rows up by natural key before deciding insert vs update.
//! `SqliteStore` implements it over a borrowed diesel connection so the same
//! code runs inside or outside a transaction.

use crate::db::*;
use crate::error::Result;
use crate::schema::*;
use crate::types::{IdeaLocation, Phase, ProjectStatus, Scope};
use diesel::prelude::*;
use diesel::sqlite::{Sqlite, SqliteConnection};

/// Where a scope's project state currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    /// Normalized tables (the default, and the only tier after migration)
    Normalized,
    /// A single legacy JSON blob that has not been migrated yet
    LegacyBlob,
}

pub trait StoragePort {
    // Host rows
    fn insert_activity(&mut self, name: &str, instructions: &str, now: i64) -> Result<i32>;
    fn get_activity(&mut self, project_id: i32) -> Result<Option<Activity>>;
    fn delete_activity(&mut self, project_id: i32) -> Result<usize>;
    fn insert_learner(&mut self, display_name: &str, now: i64) -> Result<i32>;
    fn learner_exists(&mut self, user_id: i32) -> Result<bool>;

    // Metadata
    fn get_metadata(&mut self, scope: Scope) -> Result<Option<ProjectMetadata>>;
    fn insert_metadata(&mut self, row: &NewProjectMetadata) -> Result<i32>;
    fn update_metadata(&mut self, id: i32, changes: &MetadataChangeset) -> Result<()>;
    fn set_status(&mut self, scope: Scope, status: ProjectStatus, now: i64) -> Result<usize>;

    // Ideas
    fn get_idea(&mut self, scope: Scope, id: i32) -> Result<Option<Idea>>;
    fn list_ideas(&mut self, scope: Scope) -> Result<Vec<Idea>>;
    /// Ideas sharing (location, section), with NULL section matched by IS NULL
    fn ideas_in_bucket(
        &mut self,
        scope: Scope,
        location: IdeaLocation,
        section_id: Option<&str>,
    ) -> Result<Vec<Idea>>;
    /// Ideas in a bucket whose stored content is byte-for-byte `content`
    fn ideas_with_content(
        &mut self,
        scope: Scope,
        content: &str,
        location: IdeaLocation,
        section_id: Option<&str>,
    ) -> Result<Vec<Idea>>;
    fn insert_idea(&mut self, row: &NewIdea) -> Result<i32>;
    fn update_idea(&mut self, id: i32, changes: &IdeaChangeset) -> Result<()>;
    fn delete_idea(&mut self, scope: Scope, id: i32) -> Result<usize>;

    // Phase content
    fn get_content(&mut self, scope: Scope, phase: Phase) -> Result<Option<PhaseContent>>;
    fn insert_content(&mut self, row: &NewPhaseContent) -> Result<i32>;
    fn update_content(&mut self, id: i32, content: &str, word_count: i32, now: i64) -> Result<()>;

    // Versions
    fn latest_version_number(&mut self, scope: Scope, phase: Phase) -> Result<Option<i32>>;
    fn count_versions(&mut self, scope: Scope, phase: Phase) -> Result<i64>;
    fn insert_version(&mut self, row: &NewContentVersion) -> Result<i32>;
    /// Newest first
    fn list_versions(&mut self, scope: Scope, phase: Phase, limit: Option<i64>) -> Result<Vec<ContentVersion>>;
    fn get_version(&mut self, scope: Scope, phase: Phase, version_number: i32) -> Result<Option<ContentVersion>>;
    /// Delete the `count` lowest-numbered versions
    fn delete_oldest_versions(&mut self, scope: Scope, phase: Phase, count: i64) -> Result<usize>;

    // Chat sessions
    fn list_sessions(&mut self, scope: Scope) -> Result<Vec<ChatSession>>;
    fn get_session(&mut self, scope: Scope, session_id: &str) -> Result<Option<ChatSession>>;
    fn active_session(&mut self, scope: Scope) -> Result<Option<ChatSession>>;
    fn insert_session(&mut self, scope: Scope, session_id: &str, title: &str, is_active: bool, now: i64) -> Result<i32>;
    fn deactivate_sessions(&mut self, scope: Scope, now: i64) -> Result<usize>;
    fn activate_session(&mut self, scope: Scope, session_id: &str, now: i64) -> Result<usize>;
    fn rename_session(&mut self, scope: Scope, session_id: &str, title: &str, now: i64) -> Result<usize>;
    fn touch_session(&mut self, scope: Scope, session_id: &str, now: i64) -> Result<usize>;
    fn delete_session(&mut self, scope: Scope, session_id: &str) -> Result<usize>;

    // Chat messages
    /// Ordered by logical timestamp, then insertion order
    fn list_messages(&mut self, scope: Scope, session_id: &str) -> Result<Vec<ChatMessage>>;
    fn insert_message(&mut self, row: &NewChatMessage) -> Result<i32>;
    /// Exact match on scope, session, role, content and timestamp
    fn message_exists(&mut self, row: &NewChatMessage) -> Result<bool>;
    fn delete_messages(&mut self, scope: Scope, session_id: &str) -> Result<usize>;

    // Legacy blob and migration flag
    fn get_legacy_record(&mut self, scope: Scope) -> Result<Option<LegacyRecord>>;
    fn upsert_legacy_record(&mut self, scope: Scope, data: &str, now: i64) -> Result<i32>;
    fn is_migrated(&mut self, scope: Scope) -> Result<bool>;
    fn set_migrated(&mut self, scope: Scope, now: i64) -> Result<()>;
    fn clear_migrated(&mut self, scope: Scope) -> Result<usize>;

    // Bulk removal
    /// Every normalized row plus the migration flag for one scope
    fn delete_scope_rows(&mut self, scope: Scope) -> Result<PurgeCounts>;
    /// Every row of every learner under one activity
    fn delete_project_rows(&mut self, project_id: i32) -> Result<PurgeCounts>;

    fn activity_exists(&mut self, project_id: i32) -> Result<bool> {
        Ok(self.get_activity(project_id)?.is_some())
    }

    /// Pick the tier once per call from the persisted migration flag
    fn storage_tier(&mut self, scope: Scope) -> Result<StorageTier> {
        if self.is_migrated(scope)? {
            return Ok(StorageTier::Normalized);
        }
        if self.get_legacy_record(scope)?.is_some() {
            return Ok(StorageTier::LegacyBlob);
        }
        Ok(StorageTier::Normalized)
    }
}

/// Diesel-backed store over one SQLite connection
pub struct SqliteStore<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    fn last_insert_id(&mut self) -> Result<i32> {
        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
            .first(self.conn)?;
        Ok(id)
    }

    fn bucket_query<'a>(
        scope: Scope,
        location: IdeaLocation,
        section_id: Option<&'a str>,
    ) -> project_ideas::BoxedQuery<'a, Sqlite> {
        let query = project_ideas::table
            .filter(project_ideas::project_id.eq(scope.project_id))
            .filter(project_ideas::user_id.eq(scope.user_id))
            .filter(project_ideas::location.eq(location.as_str()))
            .into_boxed();
        match section_id {
            Some(section) => query.filter(project_ideas::section_id.eq(section)),
            None => query.filter(project_ideas::section_id.is_null()),
        }
    }
}

impl StoragePort for SqliteStore<'_> {
    // ========================================================================
    // Host rows
    // ========================================================================

    fn insert_activity(&mut self, name: &str, instructions: &str, now: i64) -> Result<i32> {
        diesel::insert_into(activities::table)
            .values(&NewActivity { name, instructions, created_at: now })
            .execute(self.conn)?;
        self.last_insert_id()
    }

    fn get_activity(&mut self, project_id: i32) -> Result<Option<Activity>> {
        let row = activities::table
            .filter(activities::id.eq(project_id))
            .first::<Activity>(self.conn)
            .optional()?;
        Ok(row)
    }

    fn delete_activity(&mut self, project_id: i32) -> Result<usize> {
        let n = diesel::delete(activities::table.filter(activities::id.eq(project_id))).execute(self.conn)?;
        Ok(n)
    }

    fn insert_learner(&mut self, display_name: &str, now: i64) -> Result<i32> {
        diesel::insert_into(learners::table)
            .values(&NewLearner { display_name, created_at: now })
            .execute(self.conn)?;
        self.last_insert_id()
    }

    fn learner_exists(&mut self, user_id: i32) -> Result<bool> {
        let exists = diesel::select(diesel::dsl::exists(learners::table.filter(learners::id.eq(user_id))))
            .get_result::<bool>(self.conn)?;
        Ok(exists)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    fn get_metadata(&mut self, scope: Scope) -> Result<Option<ProjectMetadata>> {
        let row = project_metadata::table
            .filter(project_metadata::project_id.eq(scope.project_id))
            .filter(project_metadata::user_id.eq(scope.user_id))
            .first::<ProjectMetadata>(self.conn)
            .optional()?;
        Ok(row)
    }

    fn insert_metadata(&mut self, row: &NewProjectMetadata) -> Result<i32> {
        diesel::insert_into(project_metadata::table).values(row).execute(self.conn)?;
        self.last_insert_id()
    }

    fn update_metadata(&mut self, id: i32, changes: &MetadataChangeset) -> Result<()> {
        diesel::update(project_metadata::table.filter(project_metadata::id.eq(id)))
            .set(changes)
            .execute(self.conn)?;
        Ok(())
    }

    fn set_status(&mut self, scope: Scope, status: ProjectStatus, now: i64) -> Result<usize> {
        let n = diesel::update(
            project_metadata::table
                .filter(project_metadata::project_id.eq(scope.project_id))
                .filter(project_metadata::user_id.eq(scope.user_id)),
        )
        .set((
            project_metadata::status.eq(status.as_str()),
            project_metadata::modified_at.eq(now),
        ))
        .execute(self.conn)?;
        Ok(n)
    }

    // ========================================================================
    // Ideas
    // ========================================================================

    fn get_idea(&mut self, scope: Scope, id: i32) -> Result<Option<Idea>> {
        let row = project_ideas::table
            .filter(project_ideas::id.eq(id))
            .filter(project_ideas::project_id.eq(scope.project_id))
            .filter(project_ideas::user_id.eq(scope.user_id))
            .first::<Idea>(self.conn)
            .optional()?;
        Ok(row)
    }

    fn list_ideas(&mut self, scope: Scope) -> Result<Vec<Idea>> {
        let rows = project_ideas::table
            .filter(project_ideas::project_id.eq(scope.project_id))
            .filter(project_ideas::user_id.eq(scope.user_id))
            .order(project_ideas::id.asc())
            .load::<Idea>(self.conn)?;
        Ok(rows)
    }

    fn ideas_in_bucket(
        &mut self,
        scope: Scope,
        location: IdeaLocation,
        section_id: Option<&str>,
    ) -> Result<Vec<Idea>> {
        let rows = Self::bucket_query(scope, location, section_id)
            .order(project_ideas::id.asc())
            .load::<Idea>(self.conn)?;
        Ok(rows)
    }

    fn ideas_with_content(
        &mut self,
        scope: Scope,
        content: &str,
        location: IdeaLocation,
        section_id: Option<&str>,
    ) -> Result<Vec<Idea>> {
        let rows = Self::bucket_query(scope, location, section_id)
            .filter(project_ideas::content.eq(content))
            .order(project_ideas::id.asc())
            .load::<Idea>(self.conn)?;
        Ok(rows)
    }

    fn insert_idea(&mut self, row: &NewIdea) -> Result<i32> {
        diesel::insert_into(project_ideas::table).values(row).execute(self.conn)?;
        self.last_insert_id()
    }

    fn update_idea(&mut self, id: i32, changes: &IdeaChangeset) -> Result<()> {
        diesel::update(project_ideas::table.filter(project_ideas::id.eq(id)))
            .set(changes)
            .execute(self.conn)?;
        Ok(())
    }

    fn delete_idea(&mut self, scope: Scope, id: i32) -> Result<usize> {
        let n = diesel::delete(
            project_ideas::table
                .filter(project_ideas::id.eq(id))
                .filter(project_ideas::project_id.eq(scope.project_id))
                .filter(project_ideas::user_id.eq(scope.user_id)),
        )
        .execute(self.conn)?;
        Ok(n)
    }

    // ========================================================================
    // Phase content
    // ========================================================================

    fn get_content(&mut self, scope: Scope, phase: Phase) -> Result<Option<PhaseContent>> {
        let row = project_content::table
            .filter(project_content::project_id.eq(scope.project_id))
            .filter(project_content::user_id.eq(scope.user_id))
            .filter(project_content::phase.eq(phase.as_str()))
            .first::<PhaseContent>(self.conn)
            .optional()?;
        Ok(row)
    }

    fn insert_content(&mut self, row: &NewPhaseContent) -> Result<i32> {
        diesel::insert_into(project_content::table).values(row).execute(self.conn)?;
        self.last_insert_id()
    }

    fn update_content(&mut self, id: i32, content: &str, word_count: i32, now: i64) -> Result<()> {
        diesel::update(project_content::table.filter(project_content::id.eq(id)))
            .set((
                project_content::content.eq(content),
                project_content::word_count.eq(word_count),
                project_content::modified_at.eq(now),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    // ========================================================================
    // Versions
    // ========================================================================

    fn latest_version_number(&mut self, scope: Scope, phase: Phase) -> Result<Option<i32>> {
        let max: Option<i32> = content_versions::table
            .filter(content_versions::project_id.eq(scope.project_id))
            .filter(content_versions::user_id.eq(scope.user_id))
            .filter(content_versions::phase.eq(phase.as_str()))
            .select(diesel::dsl::max(content_versions::version_number))
            .first(self.conn)?;
        Ok(max)
    }

    fn count_versions(&mut self, scope: Scope, phase: Phase) -> Result<i64> {
        let count = content_versions::table
            .filter(content_versions::project_id.eq(scope.project_id))
            .filter(content_versions::user_id.eq(scope.user_id))
            .filter(content_versions::phase.eq(phase.as_str()))
            .count()
            .get_result::<i64>(self.conn)?;
        Ok(count)
    }

    fn insert_version(&mut self, row: &NewContentVersion) -> Result<i32> {
        diesel::insert_into(content_versions::table).values(row).execute(self.conn)?;
        self.last_insert_id()
    }

    fn list_versions(&mut self, scope: Scope, phase: Phase, limit: Option<i64>) -> Result<Vec<ContentVersion>> {
        let mut query = content_versions::table
            .filter(content_versions::project_id.eq(scope.project_id))
            .filter(content_versions::user_id.eq(scope.user_id))
            .filter(content_versions::phase.eq(phase.as_str()))
            .order(content_versions::version_number.desc())
            .into_boxed();
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        let rows = query.load::<ContentVersion>(self.conn)?;
        Ok(rows)
    }

    fn get_version(&mut self, scope: Scope, phase: Phase, version_number: i32) -> Result<Option<ContentVersion>> {
        let row = content_versions::table
            .filter(content_versions::project_id.eq(scope.project_id))
            .filter(content_versions::user_id.eq(scope.user_id))
            .filter(content_versions::phase.eq(phase.as_str()))
            .filter(content_versions::version_number.eq(version_number))
            .first::<ContentVersion>(self.conn)
            .optional()?;
        Ok(row)
    }

    fn delete_oldest_versions(&mut self, scope: Scope, phase: Phase, count: i64) -> Result<usize> {
        if count <= 0 {
            return Ok(0);
        }
        let doomed: Vec<i32> = content_versions::table
            .filter(content_versions::project_id.eq(scope.project_id))
            .filter(content_versions::user_id.eq(scope.user_id))
            .filter(content_versions::phase.eq(phase.as_str()))
            .order(content_versions::version_number.asc())
            .limit(count)
            .select(content_versions::id)
            .load(self.conn)?;
        let n = diesel::delete(content_versions::table.filter(content_versions::id.eq_any(doomed)))
            .execute(self.conn)?;
        Ok(n)
    }

    // ========================================================================
    // Chat sessions
    // ========================================================================

    fn list_sessions(&mut self, scope: Scope) -> Result<Vec<ChatSession>> {
        let rows = chat_sessions::table
            .filter(chat_sessions::project_id.eq(scope.project_id))
            .filter(chat_sessions::user_id.eq(scope.user_id))
            .order((chat_sessions::created_at.asc(), chat_sessions::id.asc()))
            .load::<ChatSession>(self.conn)?;
        Ok(rows)
    }

    fn get_session(&mut self, scope: Scope, session_id: &str) -> Result<Option<ChatSession>> {
        let row = chat_sessions::table
            .filter(chat_sessions::project_id.eq(scope.project_id))
            .filter(chat_sessions::user_id.eq(scope.user_id))
            .filter(chat_sessions::session_id.eq(session_id))
            .first::<ChatSession>(self.conn)
            .optional()?;
        Ok(row)
    }

    fn active_session(&mut self, scope: Scope) -> Result<Option<ChatSession>> {
        let row = chat_sessions::table
            .filter(chat_sessions::project_id.eq(scope.project_id))
            .filter(chat_sessions::user_id.eq(scope.user_id))
            .filter(chat_sessions::is_active.eq(true))
            .order(chat_sessions::modified_at.desc())
            .first::<ChatSession>(self.conn)
            .optional()?;
        Ok(row)
    }

    fn insert_session(&mut self, scope: Scope, session_id: &str, title: &str, is_active: bool, now: i64) -> Result<i32> {
        diesel::insert_into(chat_sessions::table)
            .values(&NewChatSession {
                project_id: scope.project_id,
                user_id: scope.user_id,
                session_id,
                title,
                is_active,
                created_at: now,
                modified_at: now,
            })
            .execute(self.conn)?;
        self.last_insert_id()
    }

    fn deactivate_sessions(&mut self, scope: Scope, now: i64) -> Result<usize> {
        let n = diesel::update(
            chat_sessions::table
                .filter(chat_sessions::project_id.eq(scope.project_id))
                .filter(chat_sessions::user_id.eq(scope.user_id))
                .filter(chat_sessions::is_active.eq(true)),
        )
        .set((chat_sessions::is_active.eq(false), chat_sessions::modified_at.eq(now)))
        .execute(self.conn)?;
        Ok(n)
    }

    fn activate_session(&mut self, scope: Scope, session_id: &str, now: i64) -> Result<usize> {
        let n = diesel::update(
            chat_sessions::table
                .filter(chat_sessions::project_id.eq(scope.project_id))
                .filter(chat_sessions::user_id.eq(scope.user_id))
                .filter(chat_sessions::session_id.eq(session_id)),
        )
        .set((chat_sessions::is_active.eq(true), chat_sessions::modified_at.eq(now)))
        .execute(self.conn)?;
        Ok(n)
    }

    fn rename_session(&mut self, scope: Scope, session_id: &str, title: &str, now: i64) -> Result<usize> {
        let n = diesel::update(
            chat_sessions::table
                .filter(chat_sessions::project_id.eq(scope.project_id))
                .filter(chat_sessions::user_id.eq(scope.user_id))
                .filter(chat_sessions::session_id.eq(session_id)),
        )
        .set((chat_sessions::title.eq(title), chat_sessions::modified_at.eq(now)))
        .execute(self.conn)?;
        Ok(n)
    }

    fn touch_session(&mut self, scope: Scope, session_id: &str, now: i64) -> Result<usize> {
        let n = diesel::update(
            chat_sessions::table
                .filter(chat_sessions::project_id.eq(scope.project_id))
                .filter(chat_sessions::user_id.eq(scope.user_id))
                .filter(chat_sessions::session_id.eq(session_id)),
        )
        .set(chat_sessions::modified_at.eq(now))
        .execute(self.conn)?;
        Ok(n)
    }

    fn delete_session(&mut self, scope: Scope, session_id: &str) -> Result<usize> {
        let n = diesel::delete(
            chat_sessions::table
                .filter(chat_sessions::project_id.eq(scope.project_id))
                .filter(chat_sessions::user_id.eq(scope.user_id))
                .filter(chat_sessions::session_id.eq(session_id)),
        )
        .execute(self.conn)?;
        Ok(n)
    }

    // ========================================================================
    // Chat messages
    // ========================================================================

    fn list_messages(&mut self, scope: Scope, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = chat_messages::table
            .filter(chat_messages::project_id.eq(scope.project_id))
            .filter(chat_messages::user_id.eq(scope.user_id))
            .filter(chat_messages::session_id.eq(session_id))
            .order((chat_messages::timestamp.asc(), chat_messages::id.asc()))
            .load::<ChatMessage>(self.conn)?;
        Ok(rows)
    }

    fn insert_message(&mut self, row: &NewChatMessage) -> Result<i32> {
        diesel::insert_into(chat_messages::table).values(row).execute(self.conn)?;
        self.last_insert_id()
    }

    fn message_exists(&mut self, row: &NewChatMessage) -> Result<bool> {
        let exists = diesel::select(diesel::dsl::exists(
            chat_messages::table
                .filter(chat_messages::project_id.eq(row.project_id))
                .filter(chat_messages::user_id.eq(row.user_id))
                .filter(chat_messages::session_id.eq(row.session_id))
                .filter(chat_messages::role.eq(row.role))
                .filter(chat_messages::content.eq(row.content))
                .filter(chat_messages::timestamp.eq(row.timestamp)),
        ))
        .get_result::<bool>(self.conn)?;
        Ok(exists)
    }

    fn delete_messages(&mut self, scope: Scope, session_id: &str) -> Result<usize> {
        let n = diesel::delete(
            chat_messages::table
                .filter(chat_messages::project_id.eq(scope.project_id))
                .filter(chat_messages::user_id.eq(scope.user_id))
                .filter(chat_messages::session_id.eq(session_id)),
        )
        .execute(self.conn)?;
        Ok(n)
    }

    // ========================================================================
    // Legacy blob and migration flag
    // ========================================================================

    fn get_legacy_record(&mut self, scope: Scope) -> Result<Option<LegacyRecord>> {
        let row = legacy_project_data::table
            .filter(legacy_project_data::project_id.eq(scope.project_id))
            .filter(legacy_project_data::user_id.eq(scope.user_id))
            .first::<LegacyRecord>(self.conn)
            .optional()?;
        Ok(row)
    }

    fn upsert_legacy_record(&mut self, scope: Scope, data: &str, now: i64) -> Result<i32> {
        if let Some(existing) = self.get_legacy_record(scope)? {
            diesel::update(legacy_project_data::table.filter(legacy_project_data::id.eq(existing.id)))
                .set((
                    legacy_project_data::project_data.eq(data),
                    legacy_project_data::modified_at.eq(now),
                ))
                .execute(self.conn)?;
            return Ok(existing.id);
        }
        diesel::insert_into(legacy_project_data::table)
            .values(&NewLegacyRecord {
                project_id: scope.project_id,
                user_id: scope.user_id,
                project_data: data,
                created_at: now,
                modified_at: now,
            })
            .execute(self.conn)?;
        self.last_insert_id()
    }

    fn is_migrated(&mut self, scope: Scope) -> Result<bool> {
        let exists = diesel::select(diesel::dsl::exists(
            migration_state::table
                .filter(migration_state::project_id.eq(scope.project_id))
                .filter(migration_state::user_id.eq(scope.user_id)),
        ))
        .get_result::<bool>(self.conn)?;
        Ok(exists)
    }

    fn set_migrated(&mut self, scope: Scope, now: i64) -> Result<()> {
        diesel::insert_or_ignore_into(migration_state::table)
            .values(&NewMigrationState {
                project_id: scope.project_id,
                user_id: scope.user_id,
                migrated_at: now,
            })
            .execute(self.conn)?;
        Ok(())
    }

    fn clear_migrated(&mut self, scope: Scope) -> Result<usize> {
        let n = diesel::delete(
            migration_state::table
                .filter(migration_state::project_id.eq(scope.project_id))
                .filter(migration_state::user_id.eq(scope.user_id)),
        )
        .execute(self.conn)?;
        Ok(n)
    }

    // ========================================================================
    // Bulk removal
    // ========================================================================

    fn delete_scope_rows(&mut self, scope: Scope) -> Result<PurgeCounts> {
        let (p, u) = (scope.project_id, scope.user_id);
        let counts = PurgeCounts {
            metadata: diesel::delete(
                project_metadata::table
                    .filter(project_metadata::project_id.eq(p))
                    .filter(project_metadata::user_id.eq(u)),
            )
            .execute(self.conn)?,
            ideas: diesel::delete(
                project_ideas::table
                    .filter(project_ideas::project_id.eq(p))
                    .filter(project_ideas::user_id.eq(u)),
            )
            .execute(self.conn)?,
            content: diesel::delete(
                project_content::table
                    .filter(project_content::project_id.eq(p))
                    .filter(project_content::user_id.eq(u)),
            )
            .execute(self.conn)?,
            versions: diesel::delete(
                content_versions::table
                    .filter(content_versions::project_id.eq(p))
                    .filter(content_versions::user_id.eq(u)),
            )
            .execute(self.conn)?,
            messages: diesel::delete(
                chat_messages::table
                    .filter(chat_messages::project_id.eq(p))
                    .filter(chat_messages::user_id.eq(u)),
            )
            .execute(self.conn)?,
            sessions: diesel::delete(
                chat_sessions::table
                    .filter(chat_sessions::project_id.eq(p))
                    .filter(chat_sessions::user_id.eq(u)),
            )
            .execute(self.conn)?,
            legacy: 0,
            migration_flags: self.clear_migrated(scope)?,
        };
        Ok(counts)
    }

    fn delete_project_rows(&mut self, project_id: i32) -> Result<PurgeCounts> {
        let p = project_id;
        let counts = PurgeCounts {
            metadata: diesel::delete(project_metadata::table.filter(project_metadata::project_id.eq(p)))
                .execute(self.conn)?,
            ideas: diesel::delete(project_ideas::table.filter(project_ideas::project_id.eq(p)))
                .execute(self.conn)?,
            content: diesel::delete(project_content::table.filter(project_content::project_id.eq(p)))
                .execute(self.conn)?,
            versions: diesel::delete(content_versions::table.filter(content_versions::project_id.eq(p)))
                .execute(self.conn)?,
            messages: diesel::delete(chat_messages::table.filter(chat_messages::project_id.eq(p)))
                .execute(self.conn)?,
            sessions: diesel::delete(chat_sessions::table.filter(chat_sessions::project_id.eq(p)))
                .execute(self.conn)?,
            legacy: diesel::delete(legacy_project_data::table.filter(legacy_project_data::project_id.eq(p)))
                .execute(self.conn)?,
            migration_flags: diesel::delete(migration_state::table.filter(migration_state::project_id.eq(p)))
                .execute(self.conn)?,
        };
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::scoped_db;

    fn new_idea<'a>(scope: Scope, content: &'a str, location: &'a str, section_id: Option<&'a str>) -> NewIdea<'a> {
        NewIdea {
            project_id: scope.project_id,
            user_id: scope.user_id,
            content,
            location,
            section_id,
            ai_generated: false,
            created_at: 100,
            modified_at: 100,
        }
    }

    #[test]
    fn test_bucket_matches_null_section_by_is_null() {
        let (_dir, db, scope) = scoped_db();
        db.with_store(|store| {
            store.insert_idea(&new_idea(scope, "a", "brainstorm", None))?;
            store.insert_idea(&new_idea(scope, "b", "outline", Some("intro")))?;
            store.insert_idea(&new_idea(scope, "c", "outline", None))?;

            let brainstorm = store.ideas_in_bucket(scope, IdeaLocation::Brainstorm, None)?;
            assert_eq!(brainstorm.len(), 1);
            let intro = store.ideas_in_bucket(scope, IdeaLocation::Outline, Some("intro"))?;
            assert_eq!(intro.len(), 1);
            assert_eq!(intro[0].content, "b");
            let unsectioned = store.ideas_in_bucket(scope, IdeaLocation::Outline, None)?;
            assert_eq!(unsectioned.len(), 1);
            assert_eq!(unsectioned[0].content, "c");

            let exact = store.ideas_with_content(scope, "b", IdeaLocation::Outline, Some("intro"))?;
            assert_eq!(exact.len(), 1);
            let wrong_bucket = store.ideas_with_content(scope, "b", IdeaLocation::Outline, None)?;
            assert!(wrong_bucket.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ideas_are_scoped() {
        let (_dir, db, scope) = scoped_db();
        let other = Scope::new(scope.project_id, scope.user_id + 1);
        db.with_store(|store| {
            let id = store.insert_idea(&new_idea(scope, "mine", "brainstorm", None))?;
            assert!(store.get_idea(other, id)?.is_none());
            assert_eq!(store.delete_idea(other, id)?, 0);
            assert!(store.get_idea(scope, id)?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_oldest_versions() {
        let (_dir, db, scope) = scoped_db();
        db.with_store(|store| {
            for n in 1..=5 {
                store.insert_version(&NewContentVersion {
                    project_id: scope.project_id,
                    user_id: scope.user_id,
                    phase: "write",
                    version_number: n,
                    content: "text",
                    word_count: n,
                    change_summary: "Manual save",
                    created_at: 100 + n as i64,
                    modified_by: scope.user_id,
                })?;
            }
            assert_eq!(store.delete_oldest_versions(scope, Phase::Write, 2)?, 2);
            let remaining: Vec<i32> = store
                .list_versions(scope, Phase::Write, None)?
                .iter()
                .map(|v| v.version_number)
                .collect();
            assert_eq!(remaining, vec![5, 4, 3]);
            assert_eq!(store.latest_version_number(scope, Phase::Write)?, Some(5));
            assert_eq!(store.latest_version_number(scope, Phase::Edit)?, None);
            assert_eq!(store.delete_oldest_versions(scope, Phase::Write, 0)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_storage_tier_follows_migration_flag() {
        let (_dir, db, scope) = scoped_db();
        db.with_store(|store| {
            assert_eq!(store.storage_tier(scope)?, StorageTier::Normalized);
            store.upsert_legacy_record(scope, "{}", 1)?;
            assert_eq!(store.storage_tier(scope)?, StorageTier::LegacyBlob);
            store.set_migrated(scope, 2)?;
            store.set_migrated(scope, 3)?;
            assert_eq!(store.storage_tier(scope)?, StorageTier::Normalized);
            assert_eq!(store.clear_migrated(scope)?, 1);
            assert_eq!(store.storage_tier(scope)?, StorageTier::LegacyBlob);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_message_exists_is_exact() {
        let (_dir, db, scope) = scoped_db();
        db.with_store(|store| {
            let row = NewChatMessage {
                project_id: scope.project_id,
                user_id: scope.user_id,
                session_id: "s1",
                role: "user",
                content: "hi",
                timestamp: 1_700_000_000,
                created_at: 1,
            };
            assert!(!store.message_exists(&row)?);
            store.insert_message(&row)?;
            assert!(store.message_exists(&row)?);
            let later = NewChatMessage { timestamp: 1_700_000_001, ..row };
            assert!(!store.message_exists(&later)?);
            Ok(())
        })
        .unwrap();
    }
}
