//! Durable session storage
//!
//! One SQLite row per session: JSON-encoded history and world state, the
//! cached latest assistant text, and two timestamps. The schema is
//! maintained by an explicit, versioned migration list applied at open;
//! each migration is idempotent and recorded, so a database written by an
//! older version is upgraded in place rather than reinitialized.

use crate::error::{Result, StoryweaveError};
use crate::story::{Session, Turn, WorldState};
use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

/// Ordered schema migrations, applied at open and recorded by version
///
/// Version 1 is the original schema (no world state); version 2 added the
/// `state_json` column. Rows written before version 2 load with a default
/// world state.
const MIGRATIONS: &[(i64, fn(&Connection) -> rusqlite::Result<()>)] =
    &[(1, migrate_v1_sessions), (2, migrate_v2_state_column)];

fn migrate_v1_sessions(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id   TEXT PRIMARY KEY,
            history_json TEXT NOT NULL,
            story_text   TEXT NOT NULL DEFAULT '',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn migrate_v2_state_column(conn: &Connection) -> rusqlite::Result<()> {
    // ALTER TABLE ADD COLUMN is not idempotent in SQLite; guard on the
    // actual table shape so re-running against an upgraded DB is a no-op.
    let mut stmt = conn.prepare("PRAGMA table_info(sessions)")?;
    let has_state = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|name| name.ok())
        .any(|name| name == "state_json");

    if !has_state {
        conn.execute(
            "ALTER TABLE sessions ADD COLUMN state_json TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    Ok(())
}

/// Storage backend for story sessions
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Create a new storage instance
    ///
    /// Initializes the database file in the user's data directory. The
    /// path can be overridden via the `STORYWEAVE_DB` environment
    /// variable, which makes it easy to point the binary at a test DB or
    /// alternate file without changing the application data dir.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("STORYWEAVE_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "storyweave", "storyweave")
            .ok_or_else(|| StoryweaveError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

        let db_path = data_dir.join("storyweave.db");
        Self::new_with_path(db_path)
    }

    /// Create a new storage instance that uses the specified database path.
    ///
    /// This is primarily useful for tests where the default application
    /// data directory is not desirable (for example, a temp directory).
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        // Ensure parent directory exists so opening the DB file succeeds.
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| StoryweaveError::Storage(e.to_string()))?;
        }

        let storage = Self { db_path };
        storage.migrate()?;
        Ok(storage)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| StoryweaveError::Storage(e.to_string()).into())
    }

    /// Apply any unapplied schema migrations, in order
    fn migrate(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create migrations table")
        .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

        for (version, migration) in MIGRATIONS {
            let applied: bool = conn
                .query_row(
                    "SELECT 1 FROM schema_migrations WHERE version = ?",
                    params![version],
                    |_| Ok(true),
                )
                .optional()
                .context("Failed to query migration state")
                .map_err(|e| StoryweaveError::Storage(e.to_string()))?
                .unwrap_or(false);

            if applied {
                continue;
            }

            migration(&conn)
                .with_context(|| format!("Migration {} failed", version))
                .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)",
                params![version, Utc::now().to_rfc3339()],
            )
            .context("Failed to record migration")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

            tracing::info!("Applied schema migration {}", version);
        }

        Ok(())
    }

    /// Save or update a session, keyed by its identifier
    ///
    /// Upsert semantics: the first save sets `created_at`, later saves
    /// preserve it and only overwrite history, story text, state, and
    /// `updated_at`. The read-before-write runs inside one transaction.
    pub fn save_session(
        &self,
        session_id: &str,
        history: &[Turn],
        story_text: &str,
        state: &WorldState,
    ) -> Result<()> {
        let mut conn = self.open()?;

        let history_json = serde_json::to_string(history)
            .context("Failed to serialize history")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

        let state_json = serde_json::to_string(state)
            .context("Failed to serialize world state")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

        let now = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

        // Check if exists to preserve created_at
        let existing_created_at: Option<String> = tx
            .query_row(
                "SELECT created_at FROM sessions WHERE session_id = ?",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query existing session")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

        if existing_created_at.is_some() {
            tx.execute(
                "UPDATE sessions SET
                    history_json = ?,
                    story_text   = ?,
                    state_json   = ?,
                    updated_at   = ?
                WHERE session_id = ?",
                params![history_json, story_text, state_json, now, session_id],
            )
            .context("Failed to update session")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;
        } else {
            tx.execute(
                "INSERT INTO sessions
                    (session_id, history_json, story_text, state_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)",
                params![session_id, history_json, story_text, state_json, now, now],
            )
            .context("Failed to insert session")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;
        }

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Load a session by identifier
    ///
    /// A missing or undecodable state payload is replaced by the default
    /// world state; malformed history decodes to an empty history. Both
    /// recoveries are logged, never surfaced to the caller.
    pub fn load_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.open()?;

        let row = conn
            .query_row(
                "SELECT history_json, story_text, state_json, created_at, updated_at
                FROM sessions WHERE session_id = ?",
                params![session_id],
                |row| {
                    let history_json: String = row.get(0)?;
                    let story_text: String = row.get(1)?;
                    let state_json: String = row.get(2)?;
                    let created_at: String = row.get(3)?;
                    let updated_at: String = row.get(4)?;
                    Ok((history_json, story_text, state_json, created_at, updated_at))
                },
            )
            .optional()
            .context("Failed to query session")
            .map_err(|e| StoryweaveError::Storage(e.to_string()))?;

        let (history_json, story_text, state_json, created_at, updated_at) = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let history: Vec<Turn> = match serde_json::from_str(&history_json) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    "Malformed persisted history, recovering with empty history: {}", e
                );
                Vec::new()
            }
        };

        let state = if state_json.is_empty() {
            WorldState::default()
        } else {
            WorldState::from_json_str(&state_json)
        };

        Ok(Some(Session {
            session_id: session_id.to_string(),
            history,
            story_text,
            state,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        }))
    }
}

/// Parse a stored RFC 3339 timestamp, falling back to now on failure
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
