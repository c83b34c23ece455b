//! Prompt and transcript compilation
//!
//! Two pure functions over an ordered history: `compile_prompt` produces
//! the single linear string sent to the generation backend, and
//! `compile_transcript` produces the player-facing reading view. Both are
//! deterministic and side-effect-free, which is what makes the turn
//! pipeline reproducible and testable.

use crate::story::session::{Role, Turn};
use crate::story::state::WorldState;

/// Compile history and world state into a model-facing prompt
///
/// History order is preserved. System turns appear verbatim; the
/// formatted world-state block is injected exactly once, immediately
/// after the first system turn, no matter how many system turns exist.
/// User and assistant turns carry `User:` / `Assistant:` labels, and a
/// trailing bare `Assistant:` tells the backend to continue from there.
pub fn compile_prompt(history: &[Turn], state: &WorldState) -> String {
    let mut out = Vec::new();
    let mut injected_state = false;

    for turn in history {
        let content = turn.content.trim();

        match turn.role {
            Role::System => {
                out.push(content.to_string());
                if !injected_state {
                    out.push(format!("\n{}", state.format()));
                    injected_state = true;
                }
            }
            Role::User => out.push(format!("\nUser: {}", content)),
            Role::Assistant => out.push(format!("\nAssistant: {}", content)),
        }
    }

    out.push("\nAssistant:".to_string());
    out.join("\n").trim().to_string()
}

/// Compile history into the player-visible transcript
///
/// System turns are omitted entirely, user turns carry the `> You:`
/// marker, assistant turns are unprefixed, and sections are separated by
/// a blank line.
pub fn compile_transcript(history: &[Turn]) -> String {
    let mut parts = Vec::new();

    for turn in history {
        let content = turn.content.trim();

        match turn.role {
            Role::System => continue,
            Role::User => parts.push(format!("> You: {}", content)),
            Role::Assistant => parts.push(content.to_string()),
        }
    }

    parts.join("\n\n").trim().to_string()
}
