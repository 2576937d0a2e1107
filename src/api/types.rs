//! API request and response types

use crate::db::Bot;
use crate::flow::Flow;
use crate::llm::ModelInfo;
use serde::{Deserialize, Serialize};

/// Request to route one message through a draft flow
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub message: String,
    pub flow: Flow,
    pub current_step_id: Option<String>,
    pub language: Option<String>,
}

/// Request to check a draft flow
#[derive(Debug, Deserialize)]
pub struct ValidateFlowRequest {
    pub flow: Flow,
}

/// Result of a flow check
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateFlowResponse {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_step_id: Option<String>,
}

/// Request to publish a bot
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishBotRequest {
    pub name: String,
    pub language: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub flow: Flow,
}

/// A published bot with the warnings its flow raised
#[derive(Debug, Serialize)]
pub struct PublishBotResponse {
    pub bot: Bot,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BotListResponse {
    pub bots: Vec<Bot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationResponse {
    pub conversation_id: String,
}

/// Request to send a message in a stored conversation
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

/// Response for a conversation reset
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    /// Whether the conversation had any state
    pub reset: bool,
}

/// Response for model list
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
    /// Model consulted for routing
    pub routing: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}
