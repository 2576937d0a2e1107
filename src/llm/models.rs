//! Centralized model definitions
//!
//! Every model the router may consult speaks the `OpenAI` chat completions
//! dialect, either directly or through Fireworks.

use super::openai::OpenAIModel;
use super::{LlmService, OpenAIService};
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    Fireworks,
}

impl Provider {
    /// Get the display name for this provider
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Fireworks => "Fireworks",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Fireworks => "FIREWORKS_API_KEY",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "gpt-4o-mini")
    pub id: &'static str,
    pub provider: Provider,
    pub description: &'static str,
    /// Cheap models are preferred for intent classification
    pub cheap: bool,
    pub model: OpenAIModel,
}

impl ModelDef {
    /// Build the service for this model
    pub fn create(&self, api_key: &str, gateway: Option<&str>) -> Result<Arc<dyn LlmService>, String> {
        // Accept any non-empty key (including "implicit" for gateway mode)
        if api_key.is_empty() {
            return Err(format!(
                "{} requires {} or gateway",
                self.id,
                self.provider.api_key_env_var()
            ));
        }
        let service = OpenAIService::new(api_key.to_string(), self.model, gateway)?;
        Ok(Arc::new(service))
    }
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gpt-4o-mini",
            provider: Provider::OpenAI,
            description: "GPT-4o Mini (fast, efficient)",
            cheap: true,
            model: OpenAIModel::GPT4oMini,
        },
        ModelDef {
            id: "gpt-4.1-mini",
            provider: Provider::OpenAI,
            description: "GPT-4.1 Mini (fast, better instruction following)",
            cheap: true,
            model: OpenAIModel::GPT41Mini,
        },
        ModelDef {
            id: "gpt-4o",
            provider: Provider::OpenAI,
            description: "GPT-4o (balanced)",
            cheap: false,
            model: OpenAIModel::GPT4o,
        },
        ModelDef {
            id: "deepseek-v3-fireworks",
            provider: Provider::Fireworks,
            description: "DeepSeek V3 on Fireworks",
            cheap: false,
            model: OpenAIModel::DeepseekV3Fireworks,
        },
    ]
}
