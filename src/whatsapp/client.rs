//! Sends bot replies through the Graph API

use super::{WhatsAppConfig, WhatsAppError};
use crate::flow::FlowButton;
use crate::llm::LlmError;
use crate::routing::Language;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Reply buttons WhatsApp shows inline
const MAX_REPLY_BUTTONS: usize = 3;
const MAX_BUTTON_TITLE: usize = 20;
const MAX_LIST_ROWS: usize = 10;
const MAX_ROW_TITLE: usize = 24;
/// Body limit of interactive messages
const MAX_BODY_CHARS: usize = 1024;

pub struct WhatsAppClient {
    client: Client,
    access_token: Option<String>,
    graph_url: String,
}

impl WhatsAppClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            access_token: config.access_token.clone(),
            graph_url: config.graph_url.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }

    /// Send `text` with `buttons` to `to` from the business number
    /// `phone_number_id`
    pub async fn send_reply(
        &self,
        phone_number_id: &str,
        to: &str,
        text: &str,
        buttons: &[FlowButton],
        language: Language,
    ) -> Result<(), WhatsAppError> {
        let token = self.access_token.as_deref().ok_or(WhatsAppError::NotConfigured)?;
        let payload = build_payload(to, text, buttons, language);
        let url = format!("{}/{phone_number_id}/messages", self.graph_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WhatsAppError::Send(LlmError::network(format!("Request failed: {e}"))))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(to = %to, kind = %payload["type"], "WhatsApp reply sent");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let error = LlmError::from_status(status.as_u16(), &body);
        tracing::warn!(to = %to, status = %status, error = %error, "WhatsApp send failed");
        Err(WhatsAppError::Send(error))
    }
}

/// Graph API message body. Buttons become reply buttons or a list when
/// every label fits untruncated and is distinct, so a tap sends back the
/// exact label; otherwise the options are numbered in the text.
pub(super) fn build_payload(to: &str, text: &str, buttons: &[FlowButton], language: Language) -> Value {
    let labels: Vec<&str> = buttons.iter().map(|b| b.label.as_str()).collect();
    let fits = |max: usize| labels.iter().all(|l| l.chars().count() <= max);
    let body = if text.trim().is_empty() && !labels.is_empty() {
        language.options_line(&labels.iter().map(ToString::to_string).collect::<Vec<_>>())
    } else {
        text.to_string()
    };

    let mut seen = std::collections::HashSet::new();
    let interactive = !labels.is_empty()
        && body.chars().count() <= MAX_BODY_CHARS
        && labels.iter().all(|l| seen.insert(*l));

    let mut payload = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
    });

    if interactive && labels.len() <= MAX_REPLY_BUTTONS && fits(MAX_BUTTON_TITLE) {
        let buttons: Vec<Value> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| json!({ "type": "reply", "reply": { "id": format!("opt-{i}"), "title": label } }))
            .collect();
        payload["type"] = json!("interactive");
        payload["interactive"] = json!({
            "type": "button",
            "body": { "text": body },
            "action": { "buttons": buttons }
        });
    } else if interactive && labels.len() <= MAX_LIST_ROWS && fits(MAX_ROW_TITLE) {
        let rows: Vec<Value> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| json!({ "id": format!("opt-{i}"), "title": label }))
            .collect();
        payload["type"] = json!("interactive");
        payload["interactive"] = json!({
            "type": "list",
            "body": { "text": body },
            "action": {
                "button": language.menu_label(),
                "sections": [{ "rows": rows }]
            }
        });
    } else {
        let mut text = body;
        for (i, label) in labels.iter().enumerate() {
            text.push_str(&format!("\n{}. {label}", i + 1));
        }
        payload["type"] = json!("text");
        payload["text"] = json!({ "preview_url": false, "body": text });
    }

    payload
}
