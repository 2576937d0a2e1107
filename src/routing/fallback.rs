//! Clarification replies for messages that did not move the conversation

use super::Language;
use crate::flow::FlowStep;
use crate::llm::{LlmMessage, LlmRequest};
use crate::runtime::LlmClient;
use crate::session::ChatTurn;
use std::fmt::Write as _;

/// Generates a short reply that keeps the user at the current step
pub struct FallbackResponder<L> {
    llm: L,
}

impl<L: LlmClient> FallbackResponder<L> {
    pub fn new(llm: L) -> Self {
        Self { llm }
    }

    /// Reply to `message` while staying at `step`.
    ///
    /// Never fails: a model error becomes the canned apology. When `options`
    /// is non-empty the reply always names at least one of them.
    pub async fn respond(
        &self,
        message: &str,
        step: &FlowStep,
        options: &[String],
        language: Language,
        history: &[ChatTurn],
    ) -> String {
        let request = LlmRequest::new(build_prompt(step, options, language))
            .with_messages(history.iter().map(ChatTurn::to_llm_message))
            .with_message(LlmMessage::user(message.trim()))
            .with_max_tokens(200);

        match self.llm.complete(&request).await {
            Ok(response) if !response.text.trim().is_empty() => {
                ensure_mentions_option(response.text.trim(), options, language)
            }
            Ok(_) => {
                tracing::warn!(step = %step.id, "Fallback model returned empty text");
                language.apology(options)
            }
            Err(e) => {
                tracing::error!(step = %step.id, error = %e, "Fallback reply failed");
                language.apology(options)
            }
        }
    }
}

/// System prompt for the clarification reply
pub fn build_prompt(step: &FlowStep, options: &[String], language: Language) -> String {
    let mut prompt = format!(
        "You are the WhatsApp assistant of a small business. The customer's last \
         message did not match any of the options the bot offers. Reply politely in {}, \
         in one or two sentences.",
        language.name()
    );

    if options.is_empty() {
        prompt.push_str(" Ask the customer to rephrase their request.");
    } else {
        let _ = write!(
            prompt,
            " Gently guide the customer to one of these options: {}.",
            options.join(", ")
        );
    }

    if !step.content.trim().is_empty() {
        let _ = write!(prompt, "\n\nThe bot's last message was: {}", step.content.trim());
    }
    prompt
}

fn ensure_mentions_option(text: &str, options: &[String], language: Language) -> String {
    if options.is_empty() || options.iter().any(|o| text.contains(o.as_str())) {
        return text.to_string();
    }
    format!("{text}\n\n{}", language.options_line(options))
}
