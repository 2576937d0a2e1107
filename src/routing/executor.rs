//! Turns a step into the reply the user sees

use super::Language;
use crate::flow::{FlowButton, FlowGraph};
use serde::Serialize;

/// Text and buttons of one bot reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReply {
    pub text: String,
    pub buttons: Vec<FlowButton>,
}

/// Content and buttons of `step_id`, verbatim. An id missing from the graph
/// yields the technical-error text and no buttons.
pub fn materialize(graph: &FlowGraph, step_id: &str, language: Language) -> StepReply {
    match graph.step(step_id) {
        Some(step) => StepReply {
            text: step.content.clone(),
            buttons: step.buttons.clone(),
        },
        None => {
            tracing::error!(step = %step_id, "Step missing from flow");
            StepReply {
                text: language.technical_error().to_string(),
                buttons: Vec::new(),
            }
        }
    }
}
