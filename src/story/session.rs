//! Session record and conversation turns
//!
//! A session is one player's story: the ordered role/content history,
//! the cached latest assistant text, the world state, and timestamps.
//! Session identifiers are supplied by the client and treated as opaque
//! primary keys.

use crate::story::state::WorldState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed game-master instructions seeded into every new story
pub const SYSTEM_PROMPT: &str = "You are a narrative game master for an interactive story.\n\
Write vivid, coherent story text in 2nd person present tense.\n\
Keep each response 120-220 words.\n\
Always end with exactly 3 numbered choices (1, 2, 3), each 8-14 words.\n\
Do not mention you are an AI. Do not break character.";

/// Fixed opening action seeded after the system instructions
pub const OPENING_HOOK: &str = "Start a new dark fantasy adventure with a strong hook.";

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Game-master instructions, never shown to the player
    System,
    /// Player actions
    User,
    /// Generated story continuations
    Assistant,
}

/// One entry in a session's conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced this turn
    pub role: Role,
    /// Turn text
    pub content: String,
}

impl Turn {
    /// Create a system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One player's story session
///
/// The in-memory copy owned by the registry is the source of truth while
/// a request mutates it; every mutation is flushed to storage before the
/// response is sent.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque client-supplied identifier, used as the storage primary key
    pub session_id: String,
    /// Chronological, append-only conversation history
    pub history: Vec<Turn>,
    /// Most recent assistant-generated text (cached, derived from history)
    pub story_text: String,
    /// Structured game state injected into every prompt
    pub state: WorldState,
    /// Set on first save, immutable afterwards
    pub created_at: DateTime<Utc>,
    /// Refreshed on every save
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session with the two seed turns and default state
    pub fn seed(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            history: vec![Turn::system(SYSTEM_PROMPT), Turn::user(OPENING_HOOK)],
            story_text: String::new(),
            state: WorldState::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_turn_constructors() {
        assert_eq!(Turn::system("a").role, Role::System);
        assert_eq!(Turn::user("b").role, Role::User);
        assert_eq!(Turn::assistant("c").role, Role::Assistant);
        assert_eq!(Turn::user("hello").content, "hello");
    }

    #[test]
    fn test_turn_serde_roundtrip() {
        let turn = Turn::user("look around");
        let json = serde_json::to_string(&turn).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn test_seed_session_layout() {
        let session = Session::seed("s1");
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, Role::System);
        assert_eq!(session.history[0].content, SYSTEM_PROMPT);
        assert_eq!(session.history[1].role, Role::User);
        assert_eq!(session.history[1].content, OPENING_HOOK);
        assert!(session.story_text.is_empty());
        assert_eq!(session.state, WorldState::default());
        assert_eq!(session.created_at, session.updated_at);
    }
}
