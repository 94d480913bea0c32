// Writeflow schema - project state tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

// ============================================================================
// Host Tables - activity instances and learners owned by the host LMS
// ============================================================================

diesel::table! {
    activities (id) {
        id -> Integer,
        name -> Text,
        instructions -> Text,
        created_at -> BigInt,
    }
}

diesel::table! {
    learners (id) {
        id -> Integer,
        display_name -> Text,
        created_at -> BigInt,
    }
}

// ============================================================================
// Project State Tables - all scoped by (project_id, user_id)
// ============================================================================

diesel::table! {
    project_metadata (id) {
        id -> Integer,
        project_id -> Integer,
        user_id -> Integer,
        title -> Text,
        description -> Text,
        current_tab -> Text,             // plan | write | edit
        instructor_instructions -> Text,
        goal -> Text,
        status -> Text,                  // draft | submitted
        plan_outline -> Nullable<Text>,  // JSON blob, see document::OutlineBlob
        created_at -> BigInt,
        modified_at -> BigInt,
    }
}

diesel::table! {
    project_ideas (id) {
        id -> Integer,
        project_id -> Integer,
        user_id -> Integer,
        content -> Text,
        location -> Text,                // brainstorm | outline
        section_id -> Nullable<Text>,
        ai_generated -> Bool,
        created_at -> BigInt,
        modified_at -> BigInt,
    }
}

diesel::table! {
    project_content (id) {
        id -> Integer,
        project_id -> Integer,
        user_id -> Integer,
        phase -> Text,                   // write | edit
        content -> Text,
        word_count -> Integer,
        created_at -> BigInt,
        modified_at -> BigInt,
    }
}

diesel::table! {
    content_versions (id) {
        id -> Integer,
        project_id -> Integer,
        user_id -> Integer,
        phase -> Text,
        version_number -> Integer,
        content -> Text,
        word_count -> Integer,
        change_summary -> Text,
        created_at -> BigInt,
        modified_by -> Integer,
    }
}

// ============================================================================
// Chat Tables
// ============================================================================

diesel::table! {
    chat_sessions (id) {
        id -> Integer,
        project_id -> Integer,
        user_id -> Integer,
        session_id -> Text,              // UUID - stable across renames
        title -> Text,
        is_active -> Bool,
        created_at -> BigInt,
        modified_at -> BigInt,
    }
}

diesel::table! {
    chat_messages (id) {
        id -> Integer,
        project_id -> Integer,
        user_id -> Integer,
        session_id -> Text,              // FK to chat_sessions.session_id
        role -> Text,                    // user | assistant | system
        content -> Text,
        timestamp -> BigInt,             // logical event time, epoch seconds
        created_at -> BigInt,            // insertion time
    }
}

// ============================================================================
// Legacy Storage - single JSON blob per scope, read by the migration adapter
// ============================================================================

diesel::table! {
    legacy_project_data (id) {
        id -> Integer,
        project_id -> Integer,
        user_id -> Integer,
        project_data -> Text,
        created_at -> BigInt,
        modified_at -> BigInt,
    }
}

diesel::table! {
    migration_state (id) {
        id -> Integer,
        project_id -> Integer,
        user_id -> Integer,
        migrated_at -> BigInt,
    }
}
