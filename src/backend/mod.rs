//! Generation backend abstraction
//!
//! The backend is a black box that accepts a prompt and model identifier
//! and returns or streams text. The trait keeps the orchestrator testable
//! against a mock; `OllamaBackend` is the production implementation.

pub mod ollama;

pub use ollama::OllamaBackend;

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Incremental text chunks from a streamed generation
///
/// The channel carries `Ok(text)` per increment and at most one final
/// `Err` if the stream fails mid-flight; it closes when generation ends.
pub type ChunkReceiver = mpsc::UnboundedReceiver<Result<String>>;

/// A text-generation service reachable over the network
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Lightweight readiness probe
    ///
    /// Must succeed before any generation call is attempted; failure maps
    /// to `StoryweaveError::BackendUnavailable`.
    async fn ensure_ready(&self) -> Result<()>;

    /// Buffered generation: one prompt in, the full continuation out
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Buffered generation with a per-request model override
    ///
    /// Backends that only serve a single model may ignore the override.
    async fn generate_with_model(&self, prompt: &str, model: Option<&str>) -> Result<String> {
        let _ = model;
        self.generate(prompt).await
    }

    /// Streamed generation: one prompt in, incremental chunks out
    async fn generate_stream(&self, prompt: &str) -> Result<ChunkReceiver>;
}
