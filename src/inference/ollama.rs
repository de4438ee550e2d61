//! Ollama HTTP backend
//!
//! Uses the non-streaming `/api/generate` endpoint with `format: "json"` and
//! the model options chosen by the Hardware Profiler. `/api/tags` doubles as
//! the availability probe.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{InferenceBackend, ProposedAction};
use crate::error::BackendError;
use crate::hardware::BackendAssignment;

/// Default confidence when the model omits one
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Subset of the `/api/generate` response we read
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Client for one model on an Ollama server
#[derive(Clone)]
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
    assignment: BackendAssignment,
}

impl OllamaBackend {
    /// # Arguments
    /// * `base_url` - Ollama server (e.g., "http://localhost:11434")
    /// * `assignment` - Model, context length and temperature for this agent
    /// * `timeout` - Hard cap on one HTTP exchange
    pub fn new(base_url: impl Into<String>, assignment: BackendAssignment, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            assignment,
        }
    }

    pub fn assignment(&self) -> &BackendAssignment {
        &self.assignment
    }

    /// One non-streaming completion; `json` asks the server to constrain
    /// output to a JSON object.
    pub async fn generate(&self, prompt: &str, json: bool) -> Result<String, BackendError> {
        let endpoint = format!("{}/api/generate", self.base_url);

        let mut body = serde_json::json!({
            "model": self.assignment.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.assignment.temperature,
                "num_ctx": self.assignment.context_length
            }
        });
        if json {
            body["format"] = serde_json::Value::from("json");
        }

        let response = self.client.post(&endpoint).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Unavailable(format!("HTTP {}", status)));
        }

        let body: GenerateResponse = response.json().await?;
        tracing::debug!(
            model = %self.assignment.model,
            eval_count = body.eval_count,
            "inference response received"
        );
        Ok(body.response)
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn model(&self) -> &str {
        &self.assignment.model
    }

    async fn interpret(&self, prompt: &str) -> Result<ProposedAction, BackendError> {
        let text = self.generate(prompt, true).await?;
        parse_proposed_action(&text)
            .ok_or_else(|| BackendError::Malformed("no command in model output".to_string()))
    }

    async fn is_available(&self) -> bool {
        let endpoint = format!("{}/api/tags", self.base_url);
        let response = match self
            .client
            .get(&endpoint)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return false,
        };

        match response.json::<TagsResponse>().await {
            // "llama3" is served as "llama3:latest"
            Ok(tags) => tags.models.iter().any(|m| {
                m.name == self.assignment.model
                    || m.name.split(':').next() == Some(self.assignment.model.as_str())
            }),
            Err(_) => false,
        }
    }
}

/// Extract an action from model text.
///
/// Accepts a bare JSON object, or the first JSON object embedded in prose or
/// a code fence. `command` may also be spelled `cmd` or `action`. Returns
/// `None` when no object carries a non-empty command.
pub fn parse_proposed_action(content: &str) -> Option<ProposedAction> {
    let content = content.trim();

    if let Some(action) = try_parse_action(content) {
        return Some(action);
    }

    // Scan for balanced {...} spans
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Some(action) = try_parse_action(&content[s..=i]) {
                            return Some(action);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}

fn try_parse_action(json_str: &str) -> Option<ProposedAction> {
    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;

    let command = ["command", "cmd", "action"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))?
        .trim();
    if command.is_empty() {
        return None;
    }

    let description = ["description", "explanation"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .unwrap_or("")
        .to_string();

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(|c| c as f32)
        .unwrap_or(DEFAULT_CONFIDENCE);

    Some(ProposedAction::new(command, description, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_object() {
        let action =
            parse_proposed_action(r#"{"command": "ls -la", "description": "list", "confidence": 0.9}"#)
                .unwrap();
        assert_eq!(action.command, "ls -la");
        assert_eq!(action.description, "list");
        assert!((action.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_parse_embedded_in_prose() {
        let text = "Sure! Here you go:\n```json\n{\"cmd\": \"df -h\"}\n```\nHope this helps.";
        let action = parse_proposed_action(text).unwrap();
        assert_eq!(action.command, "df -h");
        assert!((action.confidence - DEFAULT_CONFIDENCE).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let action = parse_proposed_action(r#"{"command": "pwd", "confidence": 7}"#).unwrap();
        assert!((action.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_missing_or_empty_command() {
        assert!(parse_proposed_action(r#"{"description": "nothing"}"#).is_none());
        assert!(parse_proposed_action(r#"{"command": "   "}"#).is_none());
        assert!(parse_proposed_action("no json here").is_none());
        assert!(parse_proposed_action("} stray { brace").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let assignment = BackendAssignment {
            model: "phi3:3.8b".into(),
            tier: crate::hardware::Tier::Medium,
            context_length: 4096,
            temperature: 0.3,
        };
        // Port 9 (discard) is essentially never an HTTP server
        let backend = OllamaBackend::new("http://127.0.0.1:9", assignment, Duration::from_millis(500));
        assert!(!backend.is_available().await);
        assert!(backend.interpret("list files").await.is_err());
    }
}
