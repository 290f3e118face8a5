//! Node wire format
//!
//! Nodes speak an Ollama-compatible HTTP API: the health endpoint may list
//! installed models as `{"models":[{"name":...}]}`, and the generate endpoint
//! takes `{model, prompt, stream}` and answers `{response}`. Streaming replies
//! are newline-delimited JSON chunks terminated by a `done: true` chunk.

use mesh_core::GenerateRequest;
use serde::{Deserialize, Serialize};

/// Body of a generate call
#[derive(Debug, Serialize)]
pub struct GenerateBody<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
}

impl<'a> From<&'a GenerateRequest> for GenerateBody<'a> {
    fn from(request: &'a GenerateRequest) -> Self {
        Self {
            model: &request.model,
            prompt: &request.prompt,
            stream: request.stream,
        }
    }
}

/// One generate reply, or one chunk of a streamed reply
#[derive(Debug, Default, Deserialize)]
struct GenerateChunk {
    response: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Join a node base address and an endpoint path
pub fn endpoint_url(address: &str, path: &str) -> String {
    format!(
        "{}/{}",
        address.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Extract model names from a health payload. Unrecognised payloads yield none.
pub fn parse_models(body: &str) -> Vec<String> {
    serde_json::from_str::<TagsReply>(body)
        .map(|reply| reply.models.into_iter().map(|m| m.name).collect())
        .unwrap_or_default()
}

/// Extract the produced text from a generate reply.
///
/// The error side is a human-readable reason, wrapped by the caller into a
/// per-attempt failure.
pub fn parse_generate_body(body: &str, stream: bool) -> Result<String, String> {
    if stream {
        return aggregate_stream(body);
    }

    let chunk: GenerateChunk =
        serde_json::from_str(body.trim()).map_err(|e| format!("invalid generate reply: {}", e))?;
    if let Some(error) = chunk.error {
        return Err(format!("node reported error: {}", error));
    }
    chunk
        .response
        .ok_or_else(|| "generate reply has no response field".to_string())
}

fn aggregate_stream(body: &str) -> Result<String, String> {
    let mut text = String::new();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let chunk: GenerateChunk =
            serde_json::from_str(line).map_err(|e| format!("invalid stream chunk: {}", e))?;
        if let Some(error) = chunk.error {
            return Err(format!("node reported error: {}", error));
        }
        if let Some(part) = chunk.response {
            text.push_str(&part);
        }
        if chunk.done {
            return Ok(text);
        }
    }

    Err("stream ended without a done chunk".to_string())
}

/// Shorten a reply body for error messages
pub(crate) fn excerpt(body: &str) -> &str {
    const MAX: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}
