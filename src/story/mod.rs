//! Story domain for Storyweave
//!
//! This module contains the conversational data model and the pure
//! prompt-construction pipeline:
//!
//! - `state`: the mutable world state injected into every prompt
//! - `prompt`: history-to-prompt and history-to-transcript compilation
//! - `session`: the per-player session record and its seed turns

pub mod prompt;
pub mod session;
pub mod state;

pub use prompt::{compile_prompt, compile_transcript};
pub use session::{Role, Session, Turn};
pub use state::WorldState;
