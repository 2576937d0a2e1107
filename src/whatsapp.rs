//! WhatsApp Cloud API integration
//!
//! Inbound webhook parsing and the verification handshake live in
//! `webhook`, reply delivery through the Graph API in `client`.

mod client;
mod webhook;

pub use client::WhatsAppClient;
pub use webhook::{parse_inbound, verify_subscription, InboundMessage, VerifyParams, WebhookPayload};

use crate::llm::LlmError;
use thiserror::Error;

const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v21.0";

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("WhatsApp access token is not configured")]
    NotConfigured,
    /// Graph API failures, classified the same way as model provider errors
    #[error("Graph API request failed: {0}")]
    Send(LlmError),
}

impl WhatsAppError {
    pub fn is_retryable(&self) -> bool {
        match self {
            WhatsAppError::NotConfigured => false,
            WhatsAppError::Send(e) => e.kind.is_retryable(),
        }
    }
}

/// WhatsApp settings, read from the environment
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub access_token: Option<String>,
    pub verify_token: Option<String>,
    pub graph_url: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            verify_token: None,
            graph_url: DEFAULT_GRAPH_URL.to_string(),
        }
    }
}

impl WhatsAppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            access_token: non_empty("WHATSAPP_ACCESS_TOKEN"),
            verify_token: non_empty("WHATSAPP_VERIFY_TOKEN"),
            graph_url: non_empty("WHATSAPP_GRAPH_URL")
                .map_or_else(|| DEFAULT_GRAPH_URL.to_string(), |url| url.trim_end_matches('/').to_string()),
        }
    }
}

/// Digits of a WhatsApp phone number, `None` when there are none
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("WHATSAPP_ACCESS_TOKEN", " token "),
            ("WHATSAPP_VERIFY_TOKEN", ""),
            ("WHATSAPP_GRAPH_URL", "http://localhost:9000/v21.0/"),
        ]
        .into_iter()
        .collect();
        let config = WhatsAppConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.access_token.as_deref(), Some("token"));
        assert_eq!(config.verify_token, None);
        assert_eq!(config.graph_url, "http://localhost:9000/v21.0");

        let config = WhatsAppConfig::from_lookup(|_| None);
        assert_eq!(config.graph_url, DEFAULT_GRAPH_URL);
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+972 50-123-4567").as_deref(), Some("972501234567"));
        assert_eq!(normalize_phone("abc"), None);
    }

    #[test]
    fn test_error_retryability() {
        assert!(!WhatsAppError::NotConfigured.is_retryable());
        assert!(WhatsAppError::Send(LlmError::from_status(503, "down")).is_retryable());
        assert!(!WhatsAppError::Send(LlmError::from_status(401, "bad token")).is_retryable());
    }
}
