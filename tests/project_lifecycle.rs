//! End-to-end project lifecycle through the public library API

use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use writeflow::{
    ChatEntry, Config, Database, IdeaDocument, IdeaLocation, Phase, PhaseDocument, ProjectDocument, Scope,
    WriteflowError, MANUAL_SAVE,
};

fn open() -> (TempDir, Database, Scope) {
    let dir = TempDir::new().unwrap();
    let db = Database::open_at(dir.path().join("lifecycle.db")).unwrap();
    let project = db.register_activity("Argumentative essay", "").unwrap();
    let user = db.register_learner("Grace").unwrap();
    (dir, db, Scope::new(project, user))
}

fn idea(id: &str, content: &str) -> IdeaDocument {
    IdeaDocument::new(id, content, IdeaLocation::Brainstorm, None)
}

/// `n` distinct words
fn words(n: usize, salt: usize) -> String {
    (0..n).map(|i| format!("w{}x{}", salt, i)).collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Ideas
// =============================================================================

#[test]
fn test_idea_duplicate_prevention_scenario() {
    let (_dir, db, scope) = open();

    let mut doc = ProjectDocument::default();
    doc.plan.ideas = vec![idea("tmp1", "<b>Idea A</b>")];
    let first = db.save_project(scope, &doc).unwrap();

    doc.plan.ideas = vec![idea("tmp2", "Idea A")];
    let second = db.save_project(scope, &doc).unwrap();

    let stored = db.list_ideas(scope).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(writeflow::normalize::normalize_content(&stored[0].content), "Idea A");
    assert_eq!(first.idea_id_map["tmp1"], second.idea_id_map["tmp2"]);
}

#[test]
fn test_omitted_idea_survives_save() {
    let (_dir, db, scope) = open();
    let mut doc = ProjectDocument::default();
    doc.plan.ideas = vec![idea("a", "Keep"), idea("b", "Also keep")];
    db.save_project(scope, &doc).unwrap();

    doc.plan.ideas.truncate(1);
    db.save_project(scope, &doc).unwrap();
    assert_eq!(db.list_ideas(scope).unwrap().len(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Saving the same list twice never grows past its distinct normalized size
    #[test]
    fn prop_idea_save_is_idempotent(contents in prop::collection::vec("[a-c]{1,3}( [a-c]{1,2})?", 1..8)) {
        let (_dir, db, scope) = open();
        let ideas: Vec<IdeaDocument> = contents
            .iter()
            .enumerate()
            .map(|(i, c)| idea(&format!("t{}", i), &format!("<p>{}</p>", c)))
            .collect();
        let mut doc = ProjectDocument::default();
        doc.plan.ideas = ideas;

        db.save_project(scope, &doc).unwrap();
        db.save_project(scope, &doc).unwrap();

        let mut distinct: Vec<String> = contents.iter().map(|c| writeflow::normalize::normalize_content(c)).collect();
        distinct.sort();
        distinct.dedup();
        prop_assert_eq!(db.list_ideas(scope).unwrap().len(), distinct.len());
    }
}

// =============================================================================
// Versions
// =============================================================================

#[test]
fn test_version_cap_and_monotonicity() {
    let (_dir, db, scope) = open();
    for i in 0..60 {
        let count = if i % 2 == 0 { 10 } else { 70 };
        let mut doc = ProjectDocument::default();
        doc.edit = PhaseDocument {
            content: words(count, i),
            word_count: count as i32,
        };
        db.save_project(scope, &doc).unwrap();
    }

    let history = db.get_version_history(scope, Phase::Edit, None).unwrap();
    assert_eq!(history.len(), 50);
    let numbers: Vec<i32> = history.iter().map(|v| v.version_number).collect();
    assert!(numbers.windows(2).all(|w| w[0] > w[1]));
    assert_eq!(numbers[0], 60);
    assert_eq!(*numbers.last().unwrap(), 11);
}

#[test]
fn test_custom_cap_from_config() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.versions.max_versions = 2;
    let db = Database::open_with_settings(dir.path().join("capped.db"), config.settings()).unwrap();
    let scope = Scope::new(db.register_activity("a", "").unwrap(), db.register_learner("b").unwrap());

    for i in 0..4 {
        db.save_content(scope, Phase::Write, &format!("text {}", i), 2, MANUAL_SAVE).unwrap();
    }
    let numbers: Vec<i32> = db
        .get_version_history(scope, Phase::Write, None)
        .unwrap()
        .iter()
        .map(|v| v.version_number)
        .collect();
    assert_eq!(numbers, vec![4, 3]);
}

// =============================================================================
// Chat
// =============================================================================

#[test]
fn test_append_without_session_scenario() {
    let (_dir, db, scope) = open();
    let appended = db
        .append_message(scope, None, "user", "hi", Some(&json!(1_700_000_000)))
        .unwrap();
    let active = db.get_active_session(scope).unwrap().unwrap();
    assert_eq!(active.session_id, appended.session_id);

    let messages = db.get_session_messages(scope, &appended.session_id).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hi");
}

#[test]
fn test_appends_all_visible_on_load() {
    let (_dir, db, scope) = open();
    for i in 0..25 {
        db.append_message(scope, Some("default"), "user", &format!("message {}", i), Some(&json!(1_700_000_000 + i)))
            .unwrap();
    }
    let doc = db.load_project(scope).unwrap();
    assert_eq!(doc.chat_history.len(), 25);
    assert_eq!(doc.chat_history[24].content, "message 24");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any sequence of create/switch leaves exactly one active session
    #[test]
    fn prop_single_active_session(ops in prop::collection::vec((any::<bool>(), 0usize..4), 1..12)) {
        let (_dir, db, scope) = open();
        let mut created: Vec<String> = Vec::new();
        for (create, pick) in ops {
            if create || created.is_empty() {
                created.push(db.create_session(scope, None).unwrap());
            } else {
                let target = &created[pick % created.len()];
                prop_assert!(db.switch_to_session(scope, target));
            }
            let active = db.get_sessions(scope).unwrap().iter().filter(|s| s.is_active).count();
            prop_assert_eq!(active, 1);
        }
    }
}

// =============================================================================
// Aggregate
// =============================================================================

#[test]
fn test_round_trip_preserves_content() {
    let (_dir, db, scope) = open();
    let mut doc = ProjectDocument::default();
    doc.metadata.title = "Round trip".to_string();
    doc.metadata.goal = "Persuade the council".to_string();
    doc.plan.ideas = vec![
        idea("n1", "Noise"),
        IdeaDocument::new("n2", "Safety", IdeaLocation::Outline, Some("body")),
    ];
    doc.plan.custom_section_titles = json!({"body": "Arguments"});
    doc.write = PhaseDocument {
        content: "<p>Draft</p>".to_string(),
        word_count: 1,
    };
    doc.chat_history = vec![
        ChatEntry::new("user", "What now?", 1_700_000_000),
        ChatEntry {
            role: "assistant".to_string(),
            content: "Outline first.".to_string(),
            timestamp: json!("2023-11-14T22:13:21Z"),
        },
    ];

    let saved = db.save_project(scope, &doc).unwrap();
    let loaded = db.load_project(scope).unwrap();

    assert_eq!(loaded.metadata.title, doc.metadata.title);
    assert_eq!(loaded.metadata.goal, doc.metadata.goal);
    assert_eq!(loaded.plan.custom_section_titles, doc.plan.custom_section_titles);
    assert_eq!(loaded.write, doc.write);
    for original in &doc.plan.ideas {
        let persisted = saved.idea_id_map[original.id.as_deref().unwrap()].to_string();
        let found = loaded
            .plan
            .ideas
            .iter()
            .find(|i| i.id.as_deref() == Some(persisted.as_str()))
            .unwrap();
        assert_eq!(found.content, original.content);
        assert_eq!(found.location, original.location);
        assert_eq!(found.effective_section(), original.effective_section());
    }
    let history: Vec<(String, String, serde_json::Value)> = loaded
        .chat_history
        .into_iter()
        .map(|m| (m.role, m.content, m.timestamp))
        .collect();
    assert_eq!(
        history,
        vec![
            ("user".to_string(), "What now?".to_string(), json!(1_700_000_000)),
            ("assistant".to_string(), "Outline first.".to_string(), json!(1_700_000_001)),
        ]
    );
}

#[test]
fn test_submitted_project_rows_unchanged() {
    let (_dir, db, scope) = open();
    let mut doc = ProjectDocument::default();
    doc.plan.ideas = vec![idea("a", "Only idea")];
    doc.write.content = "Final text".to_string();
    doc.write.word_count = 2;
    db.save_project(scope, &doc).unwrap();
    db.submit_project(scope).unwrap();

    let before = db.load_project(scope).unwrap();
    doc.plan.ideas.push(idea("b", "Late idea"));
    doc.write.content = "Changed after submission".to_string();
    doc.chat_history = vec![ChatEntry::new("user", "too late", 1_700_000_000)];

    let err = db.save_project(scope, &doc).unwrap_err();
    assert!(matches!(err, WriteflowError::ImmutableState));
    assert!(err.is_client_error());

    let after = db.load_project(scope).unwrap();
    assert_eq!(before, after);
    assert!(db.get_sessions(scope).unwrap().is_empty());
}

#[test]
fn test_delete_activity_removes_every_learner() {
    let (_dir, db, scope) = open();
    let other = Scope::new(scope.project_id, db.register_learner("Linus").unwrap());
    for s in [scope, other] {
        let mut doc = ProjectDocument::default();
        doc.plan.ideas = vec![idea("x", "Shared prompt")];
        db.save_project(s, &doc).unwrap();
    }
    let removed = db.delete_activity(scope.project_id).unwrap();
    assert_eq!(removed.ideas, 2);
    assert_eq!(removed.metadata, 2);
    assert!(db.get_activity(scope.project_id).unwrap().is_none());
    assert!(db.list_ideas(other).unwrap().is_empty());
}
