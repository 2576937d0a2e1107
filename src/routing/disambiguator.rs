//! Intent classification of free text against a step's outgoing edges

use crate::flow::{FlowEdge, FlowStep};
use crate::llm::{LlmError, LlmMessage, LlmRequest};
use crate::runtime::LlmClient;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

/// Literal answer meaning "none of the transitions fit"
pub const NO_MATCH: &str = "NO_MATCH";

/// Label shown to the model for default edges
const GENERAL_CONTINUE: &str = "General Continue";

/// Longest pause honoured when a provider asks us to back off
const MAX_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Outcome of a successful classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The message expresses the intent of the edge leading to `target`
    Matched { target: String },
    /// The model understood the message but no transition fits it
    NoIntentMatched,
}

/// The model could not be consulted
#[derive(Debug, Clone, Error)]
#[error("intent classification failed after {attempts} attempt(s): {source}")]
pub struct ClassificationFailed {
    pub attempts: u32,
    #[source]
    pub source: LlmError,
}

/// Asks a language model which outgoing edge a message means
pub struct IntentDisambiguator<L> {
    llm: L,
    attempts: u32,
}

impl<L: LlmClient> IntentDisambiguator<L> {
    /// `attempts` is the total number of calls made for retryable errors
    pub fn new(llm: L, attempts: u32) -> Self {
        Self {
            llm,
            attempts: attempts.max(1),
        }
    }

    pub async fn classify(
        &self,
        message: &str,
        step: &FlowStep,
        edges: &[FlowEdge],
    ) -> Result<Classification, ClassificationFailed> {
        if edges.is_empty() {
            return Ok(Classification::NoIntentMatched);
        }

        let request = LlmRequest::new(build_prompt(step, edges))
            .with_message(LlmMessage::user(message.trim()))
            .with_temperature(0.0)
            .with_max_tokens(32);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.llm.complete(&request).await {
                Ok(response) => {
                    let classification = parse_answer(&response.text, edges);
                    tracing::debug!(
                        step = %step.id,
                        answer = %response.text,
                        ?classification,
                        "Intent classified"
                    );
                    return Ok(classification);
                }
                Err(e) if e.kind.is_retryable() && attempt < self.attempts => {
                    tracing::warn!(
                        step = %step.id,
                        attempt,
                        error = %e,
                        "Intent classification failed, retrying"
                    );
                    if let Some(pause) = e.retry_after {
                        tokio::time::sleep(pause.min(MAX_RETRY_PAUSE)).await;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        step = %step.id,
                        attempt,
                        error = %e,
                        retryable = e.kind.is_retryable(),
                        "Intent classification failed"
                    );
                    return Err(ClassificationFailed {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

/// System prompt listing every outgoing edge as target id plus trigger
pub fn build_prompt(step: &FlowStep, edges: &[FlowEdge]) -> String {
    let mut prompt = String::from(
        "You route messages in a WhatsApp bot conversation. \
         Decide which transition the user's message asks for.\n\n",
    );

    let _ = writeln!(prompt, "Current step: {}", step.id);
    if let Some(title) = step.title.as_deref().filter(|t| !t.trim().is_empty()) {
        let _ = writeln!(prompt, "Step title: {title}");
    }
    if !step.content.trim().is_empty() {
        let _ = writeln!(prompt, "The bot just said: {}", step.content.trim());
    }

    prompt.push_str("\nTransitions:\n");
    for edge in edges {
        let trigger = edge.trigger().unwrap_or(GENERAL_CONTINUE);
        let _ = writeln!(prompt, "- target: {} | trigger: {trigger}", edge.target);
    }

    let _ = write!(
        prompt,
        "\nAnswer with exactly one target id from the list and nothing else. \
         If the message fits none of the transitions, answer {NO_MATCH}."
    );
    prompt
}

/// Map the model's answer onto an outgoing target.
///
/// Accepts the bare id, the id wrapped in quotes or followed by a period, or
/// a sentence that mentions exactly one of the targets.
pub fn parse_answer(answer: &str, edges: &[FlowEdge]) -> Classification {
    let cleaned = answer
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c.is_whitespace());

    if cleaned.is_empty() || cleaned.to_ascii_uppercase().contains(NO_MATCH) {
        return Classification::NoIntentMatched;
    }

    if let Some(edge) = edges.iter().find(|e| e.target == cleaned) {
        return Classification::Matched {
            target: edge.target.clone(),
        };
    }

    let mut mentioned: Vec<&str> = edges
        .iter()
        .map(|e| e.target.as_str())
        .filter(|target| mentions(cleaned, target))
        .collect();
    mentioned.sort_unstable();
    mentioned.dedup();

    match mentioned.as_slice() {
        [target] => Classification::Matched {
            target: (*target).to_string(),
        },
        _ => Classification::NoIntentMatched,
    }
}

/// Whether `target` appears in `text` as a whole word, not inside a longer id
fn mentions(text: &str, target: &str) -> bool {
    let is_id_char = |c: char| c.is_alphanumeric() || c == '-' || c == '_';
    !target.is_empty()
        && text.match_indices(target).any(|(start, _)| {
            let before = text.get(..start).and_then(|s| s.chars().next_back());
            let after = text.get(start + target.len()..).and_then(|s| s.chars().next());
            !before.is_some_and(is_id_char) && !after.is_some_and(is_id_char)
        })
}
