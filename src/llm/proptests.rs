//! Property-based tests for the `OpenAI` translation layer
//!
//! - Blank completions are rejected
//! - Message translation keeps order, role and text
//! - The system prompt is always the first wire message when present

use super::openai::{
    normalize_response, OpenAIChoice, OpenAIMessage, OpenAIModel, OpenAIResponse, OpenAIService,
};
use super::types::{LlmMessage, LlmRequest};
use proptest::prelude::*;

fn arb_message() -> impl Strategy<Value = LlmMessage> {
    (any::<bool>(), "[a-zA-Z0-9 א-ת.!?]{0,60}").prop_map(|(user, text)| {
        if user {
            LlmMessage::user(text)
        } else {
            LlmMessage::assistant(text)
        }
    })
}

fn response_with(content: Option<String>) -> OpenAIResponse {
    OpenAIResponse {
        choices: vec![OpenAIChoice {
            message: OpenAIMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
    }
}

proptest! {
    #[test]
    fn blank_completion_is_error(ws in "[ \t\n]{0,10}") {
        prop_assert!(normalize_response(response_with(Some(ws))).is_err());
        prop_assert!(normalize_response(response_with(None)).is_err());
    }

    #[test]
    fn completion_text_is_trimmed(body in "[a-zA-Z0-9_]{1,30}", pad in "[ \n]{0,5}") {
        let text = format!("{pad}{body}{pad}");
        let normalized = normalize_response(response_with(Some(text))).unwrap();
        prop_assert_eq!(normalized.text, body);
    }

    #[test]
    fn translation_preserves_messages(
        system in proptest::option::of("[a-z ]{0,40}"),
        messages in proptest::collection::vec(arb_message(), 0..12),
    ) {
        let service = OpenAIService::new("k".into(), OpenAIModel::GPT4oMini, None).unwrap();
        let request = LlmRequest {
            system: system.clone(),
            messages: messages.clone(),
            ..Default::default()
        };
        let wire = service.translate_request(&request);

        let has_system = system.as_deref().is_some_and(|s| !s.is_empty());
        let offset = usize::from(has_system);
        prop_assert_eq!(wire.messages.len(), messages.len() + offset);
        if has_system {
            prop_assert_eq!(wire.messages[0].role.as_str(), "system");
        }
        for (wire_msg, msg) in wire.messages[offset..].iter().zip(&messages) {
            prop_assert_eq!(wire_msg.content.as_deref(), Some(msg.text.as_str()));
            let expected = match msg.role {
                super::MessageRole::User => "user",
                super::MessageRole::Assistant => "assistant",
            };
            prop_assert_eq!(wire_msg.role.as_str(), expected);
        }
    }
}
