//! Turn orchestration
//!
//! The control flow that, given a session and a player action (or a
//! new-story request), extends history, invokes the generation backend,
//! and commits the result to the registry and storage. Mutating
//! operations hold a per-session lock for their entire duration, all
//! exit paths included, so concurrent turns against one session can
//! never interleave their appends; different sessions proceed in
//! parallel.
//!
//! Streamed operations run generation-and-commit in a spawned task that
//! owns the lock and writes events into an unbounded channel. A client
//! disconnect only drops the receiving half; the task still finishes and
//! persists, so no partial, unpersisted state is left behind.

use crate::backend::GenerationBackend;
use crate::error::{Result, StoryweaveError};
use crate::registry::SessionRegistry;
use crate::storage::SqliteStorage;
use crate::story::{compile_prompt, compile_transcript, Session, Turn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

/// One NDJSON event of a streamed story operation
///
/// A stream is zero or more `chunk` events followed by exactly one
/// terminal event: `final` (persistence already completed) or `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// One incremental piece of generated text
    Chunk { text: String },
    /// Terminal success event carrying the full transcript
    Final { story: String },
    /// Terminal failure event
    Error { message: String },
}

/// Receiver half of a streamed story operation
pub type EventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

/// Per-session-id mutual exclusion scope
///
/// One async mutex per session id, acquired for the duration of a
/// create or turn. Entries whose lock is no longer held by anyone are
/// pruned opportunistically on the next acquire.
struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.retain(|id, lock| id == session_id || Arc::strong_count(lock) > 1);
            Arc::clone(
                map.entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}

/// Drives story sessions through their create/turn/get transitions
pub struct TurnOrchestrator {
    backend: Arc<dyn GenerationBackend>,
    registry: Arc<SessionRegistry>,
    storage: Arc<SqliteStorage>,
    locks: SessionLocks,
}

impl TurnOrchestrator {
    /// Create an orchestrator over the given backend, registry, and storage
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        registry: SessionRegistry,
        storage: Arc<SqliteStorage>,
    ) -> Self {
        Self {
            backend,
            registry: Arc::new(registry),
            storage,
            locks: SessionLocks::new(),
        }
    }

    /// One-shot generation passthrough, no session involved
    pub async fn generate_once(&self, prompt: &str, model: Option<&str>) -> Result<String> {
        self.backend.ensure_ready().await?;
        self.backend.generate_with_model(prompt, model).await
    }

    /// Start a new story for `session_id`, returning the transcript
    ///
    /// The readiness probe runs before any work; on failure nothing is
    /// mutated. An existing session under the same id is replaced, as a
    /// fresh "new story" request supersedes it.
    pub async fn new_story(&self, session_id: &str) -> Result<String> {
        let _guard = self.locks.acquire(session_id).await;
        self.backend.ensure_ready().await?;

        let mut session = Session::seed(session_id);
        let prompt = compile_prompt(&session.history, &session.state);
        let story = self.backend.generate(&prompt).await?;

        session.history.push(Turn::assistant(story.clone()));
        session.story_text = story;

        self.storage.save_session(
            &session.session_id,
            &session.history,
            &session.story_text,
            &session.state,
        )?;

        let transcript = compile_transcript(&session.history);
        self.registry.insert(session).await;

        tracing::info!(session_id = %session_id, "Started new story");
        Ok(transcript)
    }

    /// Apply one player action to an existing session
    ///
    /// Fails with `SessionNotFound` when the id resolves neither in the
    /// registry nor in storage; nothing is created or persisted in that
    /// case. On generation failure the appended user turn is rolled back
    /// so the session is left exactly as found.
    pub async fn turn(&self, session_id: &str, action: &str) -> Result<String> {
        let _guard = self.locks.acquire(session_id).await;
        self.backend.ensure_ready().await?;

        let handle = self
            .registry
            .resolve(session_id, &self.storage)
            .await?
            .ok_or_else(|| StoryweaveError::SessionNotFound(session_id.to_string()))?;

        let mut session = handle.lock().await;
        session.history.push(Turn::user(action));

        let prompt = compile_prompt(&session.history, &session.state);
        let story = match self.backend.generate(&prompt).await {
            Ok(story) => story,
            Err(e) => {
                session.history.pop();
                return Err(e);
            }
        };

        session.history.push(Turn::assistant(story.clone()));
        session.story_text = story;

        self.storage.save_session(
            &session.session_id,
            &session.history,
            &session.story_text,
            &session.state,
        )?;

        Ok(compile_transcript(&session.history))
    }

    /// Fetch the transcript for a session
    ///
    /// A registry miss falls through to storage and repopulates the
    /// registry; a total miss returns an empty transcript rather than an
    /// error.
    pub async fn get_story(&self, session_id: &str) -> Result<String> {
        match self.registry.resolve(session_id, &self.storage).await? {
            Some(handle) => {
                let session = handle.lock().await;
                Ok(compile_transcript(&session.history))
            }
            None => Ok(String::new()),
        }
    }

    /// Streamed variant of [`new_story`](Self::new_story)
    ///
    /// The readiness probe still fails fast before any stream begins. The
    /// seed session is registered only after a successful commit, so a
    /// stream that dies without producing text leaves any existing session
    /// under this id untouched in both registry and storage.
    pub async fn new_story_stream(&self, session_id: &str) -> Result<EventReceiver> {
        let guard = self.locks.acquire(session_id).await;
        self.backend.ensure_ready().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let backend = Arc::clone(&self.backend);
        let storage = Arc::clone(&self.storage);
        let registry = Arc::clone(&self.registry);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            let mut session = Session::seed(session_id);
            let committed = drive_stream(&*backend, &storage, &mut session, &tx, true).await;
            if committed {
                registry.insert(session).await;
            }
        });

        Ok(rx)
    }

    /// Streamed variant of [`turn`](Self::turn)
    pub async fn turn_stream(&self, session_id: &str, action: &str) -> Result<EventReceiver> {
        let guard = self.locks.acquire(session_id).await;
        self.backend.ensure_ready().await?;

        let handle = self
            .registry
            .resolve(session_id, &self.storage)
            .await?
            .ok_or_else(|| StoryweaveError::SessionNotFound(session_id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let backend = Arc::clone(&self.backend);
        let storage = Arc::clone(&self.storage);
        let action = action.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            let mut session = handle.lock().await;
            session.history.push(Turn::user(action));
            drive_stream(&*backend, &storage, &mut session, &tx, false).await;
        });

        Ok(rx)
    }
}

/// Run one streamed generation against `session` and commit the result
///
/// Emits a `chunk` event per increment, persists, then emits the single
/// terminal event. On mid-stream failure any accumulated partial text is
/// still committed (so a refresh does not lose progress) before the
/// `error` event goes out; if nothing was generated, the appended turn is
/// rolled back instead unless this is a fresh seed (`is_create`).
///
/// Returns whether the session was committed to storage, so the create
/// path can decide whether to register the session at all.
async fn drive_stream(
    backend: &dyn GenerationBackend,
    storage: &SqliteStorage,
    session: &mut Session,
    tx: &mpsc::UnboundedSender<StreamEvent>,
    is_create: bool,
) -> bool {
    let prompt = compile_prompt(&session.history, &session.state);

    let mut chunks = match backend.generate_stream(&prompt).await {
        Ok(chunks) => chunks,
        Err(e) => {
            if !is_create {
                session.history.pop();
            }
            let _ = tx.send(StreamEvent::Error {
                message: e.to_string(),
            });
            return false;
        }
    };

    let mut assistant_text = String::new();
    let mut failure = None;

    while let Some(item) = chunks.recv().await {
        match item {
            Ok(text) => {
                assistant_text.push_str(&text);
                let _ = tx.send(StreamEvent::Chunk { text });
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    if let Some(e) = failure {
        tracing::warn!(session_id = %session.session_id, "Generation stream failed: {}", e);
        let mut committed = false;
        if assistant_text.is_empty() {
            if !is_create {
                session.history.pop();
            }
        } else {
            match commit(storage, session, assistant_text) {
                Ok(()) => committed = true,
                Err(persist_err) => {
                    tracing::error!(
                        session_id = %session.session_id,
                        "Failed to persist partial progress: {}", persist_err
                    );
                }
            }
        }
        let _ = tx.send(StreamEvent::Error {
            message: e.to_string(),
        });
        return committed;
    }

    if let Err(e) = commit(storage, session, assistant_text) {
        tracing::error!(session_id = %session.session_id, "Failed to persist session: {}", e);
        let _ = tx.send(StreamEvent::Error {
            message: e.to_string(),
        });
        return false;
    }

    let _ = tx.send(StreamEvent::Final {
        story: compile_transcript(&session.history),
    });
    true
}

/// Append the assistant reply and flush the session to storage
fn commit(storage: &SqliteStorage, session: &mut Session, assistant_text: String) -> Result<()> {
    session.history.push(Turn::assistant(assistant_text.clone()));
    session.story_text = assistant_text;
    storage.save_session(
        &session.session_id,
        &session.history,
        &session.story_text,
        &session.state,
    )
}
