use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Default request timeout for a full streamed completion
pub const REQUEST_TIMEOUT_SECS: u64 = 300;

/// A black-box text-completion service.
///
/// Implementations return the raw transport envelope; decoding is the
/// caller's job. The transport never retries on its own.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<serde_json::Value>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// One newline-delimited chunk of a streamed generation
#[derive(Deserialize, Debug, Default)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for an Ollama-compatible `/api/generate` streaming endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: url::Url,
    model: String,
    http: reqwest::Client,
}

/// Create a configured HTTP client
pub(crate) fn create_http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let base_url = url::Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid model URL {}: {}", base_url, e))?;
        Ok(Self {
            base_url,
            model: model.into(),
            http: create_http_client(timeout_secs)?,
        })
    }

    fn endpoint(&self) -> anyhow::Result<url::Url> {
        self.base_url
            .join("api/generate")
            .map_err(|e| anyhow::anyhow!("Invalid model URL {}: {}", self.base_url, e))
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<serde_json::Value> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: true,
        };

        let response = self
            .http
            .post(self.endpoint()?)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Model service error {}: {}",
                status,
                truncate_str(&text, 200)
            ));
        }

        let mut stream = response.bytes_stream();
        // Bytes, not text: a multi-byte character may straddle two chunks
        let mut buffer: Vec<u8> = Vec::new();
        let mut content = String::new();
        let mut model = None;
        let mut finished = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_transport_error)?;
            buffer.extend_from_slice(&chunk);

            while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=line_end).collect();
                let line = String::from_utf8_lossy(&line);
                if consume_line(line.trim(), &mut content, &mut model)? {
                    finished = true;
                }
            }
            if finished {
                break;
            }
        }

        // A final chunk without a trailing newline
        if !finished {
            let rest = String::from_utf8_lossy(&buffer);
            if !rest.trim().is_empty() {
                finished = consume_line(rest.trim(), &mut content, &mut model)?;
            }
        }

        if !finished {
            tracing::warn!(chars = content.len(), "model stream ended without done marker");
        }

        Ok(json!({
            "response": content,
            "model": model.unwrap_or_else(|| self.model.clone()),
            "done": finished,
        }))
    }
}

/// Append one NDJSON chunk; returns true on the terminal chunk.
fn consume_line(
    line: &str,
    content: &mut String,
    model: &mut Option<String>,
) -> anyhow::Result<bool> {
    if line.is_empty() {
        return Ok(false);
    }
    let chunk: GenerateChunk = serde_json::from_str(line).map_err(|e| {
        anyhow::anyhow!(
            "Malformed stream chunk ({}): {}",
            e,
            truncate_str(line, 200)
        )
    })?;
    if let Some(error) = chunk.error {
        return Err(anyhow::anyhow!("Model service error: {}", error));
    }
    content.push_str(&chunk.response);
    if chunk.model.is_some() {
        *model = chunk.model;
    }
    Ok(chunk.done)
}

fn map_transport_error(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow::anyhow!("Model request timed out: {}", err)
    } else if err.is_connect() {
        anyhow::anyhow!("Could not reach model service: {}", err)
    } else {
        anyhow::anyhow!("Model request failed: {}", err)
    }
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}
