//! Model-backed request routing
//!
//! Picks the agent family for a request that arrived without one. Keyword
//! routing in `AgentKind::route` stays the fallback for every error.

use std::time::Duration;

use async_trait::async_trait;

use super::prompt::build_routing_prompt;
use super::OllamaBackend;
use crate::agent::AgentKind;
use crate::error::BackendError;
use crate::hardware::{BackendAssignment, Tier};

/// Short answers only, so a small context is enough
const ROUTER_CONTEXT_LENGTH: u32 = 2048;
const ROUTER_TEMPERATURE: f32 = 0.1;

/// `(request) → agent kind, or error`
#[async_trait]
pub trait RequestRouter: Send + Sync {
    /// Model identifier, for provenance and metrics
    fn model(&self) -> &str;

    async fn categorize(&self, request: &str) -> Result<AgentKind, BackendError>;
}

/// Routes through a small Ollama model
pub struct OllamaRouter {
    backend: OllamaBackend,
}

impl OllamaRouter {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, tier: Tier, timeout: Duration) -> Self {
        let assignment = BackendAssignment {
            model: model.into(),
            tier,
            context_length: ROUTER_CONTEXT_LENGTH,
            temperature: ROUTER_TEMPERATURE,
        };
        Self {
            backend: OllamaBackend::new(base_url, assignment, timeout),
        }
    }
}

#[async_trait]
impl RequestRouter for OllamaRouter {
    fn model(&self) -> &str {
        &self.backend.assignment().model
    }

    async fn categorize(&self, request: &str) -> Result<AgentKind, BackendError> {
        let text = self.backend.generate(&build_routing_prompt(request), false).await?;
        parse_category(&text)
            .ok_or_else(|| BackendError::Malformed(format!("unknown category {:?}", text.trim())))
    }
}

/// Agent kind named on the first line of a routing answer.
///
/// Tolerates case, surrounding punctuation and the short names `shell` and
/// `activity`.
pub fn parse_category(text: &str) -> Option<AgentKind> {
    let line = text.trim().lines().next()?;
    let name = line
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .to_lowercase()
        .replace(' ', "_");

    match name.as_str() {
        "shell" => Some(AgentKind::ShellAssistant),
        "activity" => Some(AgentKind::ActivityTracker),
        other => other.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category_names() {
        assert_eq!(parse_category("troubleshooting"), Some(AgentKind::Troubleshooting));
        assert_eq!(parse_category("  File_Management.\n"), Some(AgentKind::FileManagement));
        assert_eq!(parse_category("shell"), Some(AgentKind::ShellAssistant));
        assert_eq!(parse_category("`activity`"), Some(AgentKind::ActivityTracker));
        assert_eq!(parse_category("software install"), Some(AgentKind::SoftwareInstall));
    }

    #[test]
    fn test_parse_category_rejects_prose() {
        assert_eq!(parse_category(""), None);
        assert_eq!(parse_category("I think this is about files"), None);
        assert_eq!(parse_category("email"), None);
    }

    #[tokio::test]
    async fn test_unreachable_router_errors() {
        let router = OllamaRouter::new("http://127.0.0.1:9", "phi3", Tier::Medium, Duration::from_millis(500));
        assert_eq!(router.model(), "phi3");
        assert!(router.categorize("install vim").await.is_err());
    }
}
