//! Integration tests for the full story lifecycle
//!
//! Drives the real `OllamaBackend` and `TurnOrchestrator` against a mock
//! Ollama server: new story, turns, transcript fetch, restart recovery,
//! failure paths, and the per-session concurrency guarantee.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use storyweave::backend::OllamaBackend;
use storyweave::config::OllamaConfig;
use storyweave::orchestrator::{StreamEvent, TurnOrchestrator};
use storyweave::registry::SessionRegistry;
use storyweave::storage::SqliteStorage;
use storyweave::story::Role;
use storyweave::StoryweaveError;

const STORY_TEXT: &str = "The gate creaks open. 1) Enter 2) Wait 3) Flee";

fn backend_for(server: &MockServer) -> OllamaBackend {
    OllamaBackend::new(OllamaConfig {
        host: server.uri(),
        model: "test-model".to_string(),
        request_timeout_secs: 5,
        readiness_timeout_secs: 1,
    })
    .expect("backend")
}

fn orchestrator_for(server: &MockServer, db_path: &std::path::Path) -> Arc<TurnOrchestrator> {
    let storage = Arc::new(SqliteStorage::new_with_path(db_path).expect("storage"));
    Arc::new(TurnOrchestrator::new(
        Arc::new(backend_for(server)),
        SessionRegistry::new(64),
        storage,
    ))
}

async fn mount_ready(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(server)
        .await;
}

async fn mount_generate(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-model",
            "response": text,
            "done": true
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_lifecycle_new_turn_get() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    mount_generate(&server, STORY_TEXT).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let orchestrator = orchestrator_for(&server, &temp_dir.path().join("test.db"));

    let story = orchestrator.new_story("alpha").await.expect("new story");
    assert!(story.contains("> You: Start a new dark fantasy adventure"));
    assert!(story.contains(STORY_TEXT));

    let story = orchestrator.turn("alpha", "enter the gate").await.expect("turn");
    assert!(story.contains("> You: enter the gate"));

    let fetched = orchestrator.get_story("alpha").await.expect("get");
    assert_eq!(fetched, story);
}

#[tokio::test]
async fn test_transcript_survives_restart() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    mount_generate(&server, STORY_TEXT).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");

    let before = {
        let orchestrator = orchestrator_for(&server, &db_path);
        orchestrator.new_story("alpha").await.expect("new story");
        orchestrator.turn("alpha", "look around").await.expect("turn")
    };

    // A fresh orchestrator over the same database simulates a restart.
    let orchestrator = orchestrator_for(&server, &db_path);
    let after = orchestrator.get_story("alpha").await.expect("get");
    assert_eq!(after, before);

    // And turns keep working against the rehydrated session.
    let extended = orchestrator.turn("alpha", "go north").await.expect("turn");
    assert!(extended.contains("> You: look around"));
    assert!(extended.contains("> You: go north"));
}

#[tokio::test]
async fn test_turn_on_unknown_session_persists_nothing() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    mount_generate(&server, STORY_TEXT).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let orchestrator = orchestrator_for(&server, &db_path);

    let err = orchestrator.turn("ghost", "hello?").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoryweaveError>(),
        Some(StoryweaveError::SessionNotFound(_))
    ));

    let storage = SqliteStorage::new_with_path(&db_path).expect("storage");
    assert!(storage.load_session("ghost").expect("load").is_none());
}

#[tokio::test]
async fn test_unreachable_backend_fails_fast_without_mutation() {
    // A server with no mounted routes answers 404 to the readiness probe.
    let server = MockServer::start().await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let orchestrator = orchestrator_for(&server, &db_path);

    let err = orchestrator.new_story("alpha").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoryweaveError>(),
        Some(StoryweaveError::BackendUnavailable(_))
    ));

    let storage = SqliteStorage::new_with_path(&db_path).expect("storage");
    assert!(storage.load_session("alpha").expect("load").is_none());
}

#[tokio::test]
async fn test_streamed_turn_emits_chunks_then_final() {
    let server = MockServer::start().await;
    mount_ready(&server).await;

    let ndjson = concat!(
        "{\"model\":\"test-model\",\"response\":\"The gate \",\"done\":false}\n",
        "{\"model\":\"test-model\",\"response\":\"creaks open.\",\"done\":false}\n",
        "{\"model\":\"test-model\",\"response\":\"\",\"done\":true}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"),
        )
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let orchestrator = orchestrator_for(&server, &db_path);

    let mut rx = orchestrator.new_story_stream("alpha").await.expect("stream");
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let chunks: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["The gate ", "creaks open."]);

    match events.last() {
        Some(StreamEvent::Final { story }) => {
            assert!(story.contains("The gate creaks open."));
        }
        other => panic!("expected terminal final event, got {:?}", other),
    }

    // The streamed result was persisted with the accumulated text.
    let storage = SqliteStorage::new_with_path(&db_path).expect("storage");
    let stored = storage
        .load_session("alpha")
        .expect("load")
        .expect("persisted");
    assert_eq!(stored.story_text, "The gate creaks open.");
    assert_eq!(stored.history.len(), 3);
}

#[tokio::test]
async fn test_concurrent_turns_keep_history_alternating() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    mount_generate(&server, STORY_TEXT).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let orchestrator = orchestrator_for(&server, &db_path);

    orchestrator.new_story("alpha").await.expect("new story");

    const N: usize = 6;
    let mut tasks = Vec::new();
    for i in 0..N {
        let orchestrator = Arc::clone(&orchestrator);
        tasks.push(tokio::spawn(async move {
            orchestrator.turn("alpha", &format!("action {}", i)).await
        }));
    }
    for task in tasks {
        task.await.expect("join").expect("turn");
    }

    let storage = SqliteStorage::new_with_path(&db_path).expect("storage");
    let stored = storage
        .load_session("alpha")
        .expect("load")
        .expect("persisted");
    assert_eq!(stored.history.len(), 3 + 2 * N);
    for (i, turn) in stored.history[3..].iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(turn.role, expected, "entry {} out of order", i + 3);
    }
}
