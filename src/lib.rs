//! Storyweave - interactive story server library
//!
//! This library provides the core functionality of the Storyweave server,
//! a session-oriented text-adventure backend that proxies prompts to a
//! local Ollama instance and persists every session in SQLite.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `story`: Session model, world state, and prompt/transcript compilation
//! - `backend`: Generation backend abstraction and the Ollama implementation
//! - `orchestrator`: Turn orchestration with per-session locking
//! - `registry`: In-memory residency of active sessions
//! - `storage`: SQLite persistence with versioned migrations
//! - `server`: HTTP surface (axum)
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use storyweave::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     // Server startup would go here
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod storage;
pub mod story;

// Re-export commonly used types
pub use backend::{GenerationBackend, OllamaBackend};
pub use config::Config;
pub use error::{Result, StoryweaveError};
pub use orchestrator::{StreamEvent, TurnOrchestrator};
pub use registry::SessionRegistry;
pub use storage::SqliteStorage;
pub use story::{Session, Turn, WorldState};
