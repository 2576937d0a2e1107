//! Webhook payloads sent by the WhatsApp Cloud API

use super::normalize_phone;
use serde::Deserialize;

/// Body of a webhook `POST`. Fields we do not use are ignored and missing
/// ones default, so status callbacks and unknown message types parse too.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    pub metadata: Option<ChangeMetadata>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeMetadata {
    #[serde(default)]
    pub phone_number_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub text: Option<WireText>,
    pub button: Option<WireButton>,
    pub interactive: Option<WireInteractive>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireText {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireButton {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireInteractive {
    pub button_reply: Option<WireReply>,
    pub list_reply: Option<WireReply>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireReply {
    #[serde(default)]
    pub title: String,
}

impl WireMessage {
    /// What the user typed or tapped; `None` for media and other types
    fn text(&self) -> Option<&str> {
        let text = match self.kind.to_ascii_lowercase().as_str() {
            "text" => self.text.as_ref().map(|t| t.body.as_str()),
            "button" => self.button.as_ref().map(|b| b.text.as_str()),
            "interactive" => self.interactive.as_ref().and_then(|i| {
                i.button_reply
                    .as_ref()
                    .or(i.list_reply.as_ref())
                    .map(|r| r.title.as_str())
            }),
            _ => None,
        }?;
        let text = text.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// A text-bearing message addressed to one of our business numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Business number the message was sent to
    pub phone_number_id: String,
    /// Sender, digits only
    pub from: String,
    pub message_id: String,
    pub text: String,
}

impl InboundMessage {
    /// Conversation key: one conversation per bot and sender
    pub fn conversation_id(&self, bot_id: &str) -> String {
        format!("whatsapp:{bot_id}:{}", self.from)
    }
}

/// Extract routable messages. Entries without a business number, sender,
/// message id or text are skipped.
pub fn parse_inbound(payload: &WebhookPayload) -> Vec<InboundMessage> {
    let mut inbound = Vec::new();
    for change in payload.entry.iter().flat_map(|e| &e.changes) {
        let value = &change.value;
        let Some(phone_number_id) = value
            .metadata
            .as_ref()
            .map(|m| m.phone_number_id.trim())
            .filter(|id| !id.is_empty())
        else {
            continue;
        };

        for message in &value.messages {
            let Some(from) = normalize_phone(&message.from) else {
                continue;
            };
            let Some(text) = message.text() else {
                tracing::debug!(kind = %message.kind, "Ignoring non-text WhatsApp message");
                continue;
            };
            if message.id.is_empty() {
                continue;
            }
            inbound.push(InboundMessage {
                phone_number_id: phone_number_id.to_string(),
                from,
                message_id: message.id.clone(),
                text: text.to_string(),
            });
        }
    }
    inbound
}

/// Query of the `GET /webhook` verification request
#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// The challenge to echo when the subscription request is valid
pub fn verify_subscription(params: &VerifyParams, expected_token: Option<&str>) -> Option<String> {
    let expected = expected_token.filter(|t| !t.is_empty())?;
    let challenge = params.challenge.as_deref().filter(|c| !c.is_empty())?;
    if params.mode.as_deref() == Some("subscribe") && params.verify_token.as_deref() == Some(expected) {
        Some(challenge.to_string())
    } else {
        None
    }
}
