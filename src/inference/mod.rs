//! Inference backends
//!
//! An agent may consult a local model to turn a free-form request into one
//! concrete shell action. The backend is optional and never trusted to be up:
//! every error is recovered by the agent's rule table.
//!
//! ```text
//! request ──► build_prompt() ──► InferenceBackend::interpret() ──► ProposedAction
//!                                       │ error / timeout / throttled
//!                                       ▼
//!                                 rule fallback
//! ```
//!
//! A `RequestRouter` answers the earlier question of which agent should take
//! an unrouted request, with keyword routing as its fallback.

pub mod ollama;
pub mod prompt;
pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

pub use ollama::{parse_proposed_action, OllamaBackend};
pub use prompt::{build_prompt, build_routing_prompt};
pub use router::{parse_category, OllamaRouter, RequestRouter};

/// A concrete action chosen for a request, by a model or by a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Shell command line
    pub command: String,
    pub description: String,
    /// 0.0 to 1.0
    pub confidence: f32,
}

impl ProposedAction {
    pub fn new(command: impl Into<String>, description: impl Into<String>, confidence: f32) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// `(prompt) → structured action, or error/timeout`
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Model identifier, for provenance and metrics
    fn model(&self) -> &str;

    async fn interpret(&self, prompt: &str) -> Result<ProposedAction, BackendError>;

    /// Cheap reachability probe
    async fn is_available(&self) -> bool;
}
