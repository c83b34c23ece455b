//! Ollama backend implementation
//!
//! Connects to a local or remote Ollama server: `/api/tags` serves as the
//! readiness probe, `/api/generate` handles both buffered and streamed
//! generation. Streamed responses are newline-delimited JSON objects
//! (`{"response": "...", "done": false}`) terminated by `done == true`.

use crate::backend::{ChunkReceiver, GenerationBackend};
use crate::config::OllamaConfig;
use crate::error::{Result, StoryweaveError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Request body for `/api/generate`
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Buffered response from `/api/generate`
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// One NDJSON line of a streamed `/api/generate` response
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

/// Ollama generation backend
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    /// Create a new Ollama backend instance
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("storyweave/0.1.0")
            .build()
            .map_err(|e| {
                StoryweaveError::Backend(format!("Failed to create HTTP client: {}", e))
            })?;

        tracing::info!(
            "Initialized Ollama backend: host={}, model={}",
            config.host,
            config.model
        );

        Ok(Self { client, config })
    }

    /// Get the configured Ollama host
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Get the configured model name
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.config.host)
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn ensure_ready(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.config.host);
        tracing::debug!("Probing Ollama readiness: {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.readiness_timeout_secs))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Ollama readiness probe failed: {}", e);
                StoryweaveError::BackendUnavailable(format!(
                    "Ollama is not running at {}: {}",
                    self.config.host, e
                ))
            })?;

        if !response.status().is_success() {
            return Err(StoryweaveError::BackendUnavailable(format!(
                "Ollama readiness probe returned {}",
                response.status()
            ))
            .into());
        }

        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_model(prompt, None).await
    }

    async fn generate_with_model(&self, prompt: &str, model: Option<&str>) -> Result<String> {
        let url = self.generate_url();
        let model = model.unwrap_or(&self.config.model);
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        tracing::debug!(
            "Sending buffered generation request: model={}, prompt_len={}",
            model,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Ollama request failed: {}", e);
                StoryweaveError::BackendUnavailable(format!("Cannot reach Ollama at {}: {}", url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Ollama returned error {}: {}", status, error_text);
            return Err(StoryweaveError::Backend(format!(
                "Ollama returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse Ollama response: {}", e);
            StoryweaveError::Backend(format!("Failed to parse Ollama response: {}", e))
        })?;

        Ok(body.response)
    }

    async fn generate_stream(&self, prompt: &str) -> Result<ChunkReceiver> {
        let url = self.generate_url();
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: true,
        };

        tracing::debug!(
            "Sending streamed generation request: model={}, prompt_len={}",
            self.config.model,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Ollama stream request failed: {}", e);
                StoryweaveError::BackendUnavailable(format!("Cannot reach Ollama at {}: {}", url, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Ollama returned error {}: {}", status, error_text);
            return Err(StoryweaveError::Backend(format!(
                "Ollama returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(parse_ndjson_stream(response.bytes_stream(), tx));

        Ok(rx)
    }
}

/// Consume an NDJSON byte stream, forwarding chunk text to `tx`
///
/// Undecodable lines are skipped (Ollama occasionally interleaves
/// keep-alive noise); the stream terminates when a line carries
/// `done == true` or the body ends. A transport error mid-stream is
/// forwarded once and ends the stream.
async fn parse_ndjson_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    tx: mpsc::UnboundedSender<Result<String>>,
) {
    use futures::StreamExt;

    // Raw byte buffer split on newline boundaries. Transport chunks can
    // end mid-character, so decoding happens per complete line, never per
    // chunk.
    let mut buffer = BytesMut::new();

    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(StoryweaveError::Backend(format!(
                    "Ollama stream interrupted: {}",
                    e
                ))
                .into()));
                return;
            }
        };

        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line = buffer.split_to(pos + 1);
            if let Ok(line) = std::str::from_utf8(&line[..pos]) {
                if process_ndjson_line(line, &tx) {
                    return;
                }
            }
        }
    }

    // Process any remaining partial line in the buffer.
    if !buffer.is_empty() {
        if let Ok(line) = std::str::from_utf8(&buffer) {
            process_ndjson_line(line, &tx);
        }
    }
}

/// Handle one NDJSON line; returns true when the stream is done
fn process_ndjson_line(line: &str, tx: &mpsc::UnboundedSender<Result<String>>) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }

    let chunk: GenerateChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(_) => return false,
    };

    if let Some(text) = chunk.response {
        if !text.is_empty() {
            let _ = tx.send(Ok(text));
        }
    }

    chunk.done
}
