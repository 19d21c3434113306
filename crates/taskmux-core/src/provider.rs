//! Provider selection
//!
//! The process-wide backend/provider/model triple used for new backend calls.
//! Each session also keeps its own copy, captured when it is backgrounded and
//! pushed back here when it is restored.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// The backend, provider and model a session runs against
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderBinding {
    pub backend: String,
    pub provider: String,
    pub model: String,
}

impl ProviderBinding {
    pub fn new(
        backend: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            backend: backend.into(),
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Shared, process-wide provider selection
pub type SharedProviderSelection = Arc<RwLock<ProviderBinding>>;

/// Create a shared selection starting at `binding`
pub fn shared_selection(binding: ProviderBinding) -> SharedProviderSelection {
    Arc::new(RwLock::new(binding))
}

/// Guess the provider from a model name
pub fn infer_provider(model: &str) -> Option<&'static str> {
    let lowered = model.to_ascii_lowercase();
    // "models/gemini-1.5-pro", "openrouter/gpt-4o"
    let model = lowered.rsplit('/').next().unwrap_or(lowered.as_str());

    if model.starts_with("claude") {
        Some("anthropic")
    } else if model.starts_with("gpt")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        Some("openai")
    } else if model.starts_with("gemini") {
        Some("google")
    } else if model.starts_with("deepseek") {
        Some("deepseek")
    } else if model.starts_with("llama") || model.starts_with("mixtral") {
        Some("groq")
    } else {
        None
    }
}

/// Build a binding from a backend, an optional explicit provider and a model.
///
/// An explicit provider always wins. Without one, the provider is inferred
/// from the model name. When both exist and disagree the mismatch is logged
/// and the explicit provider is kept.
pub fn resolve_binding(backend: &str, provider: Option<&str>, model: &str) -> ProviderBinding {
    let inferred = infer_provider(model);
    let provider = match (provider.filter(|p| !p.is_empty()), inferred) {
        (Some(explicit), Some(guess)) if !explicit.eq_ignore_ascii_case(guess) => {
            warn!(
                "Provider '{}' does not match model '{}' (looks like '{}'); keeping '{}'",
                explicit, model, guess, explicit
            );
            explicit.to_string()
        }
        (Some(explicit), _) => explicit.to_string(),
        (None, Some(guess)) => guess.to_string(),
        (None, None) => String::new(),
    };

    ProviderBinding::new(backend, provider, model)
}
