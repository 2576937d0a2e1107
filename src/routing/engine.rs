//! Routing of one inbound message

use super::decision::{decide, Decision, StayCause, Transition};
use super::disambiguator::IntentDisambiguator;
use super::executor::materialize;
use super::fallback::FallbackResponder;
use super::resolver::resolve_label;
use super::{Language, RoutingConfig};
use crate::flow::{FlowButton, FlowGraph};
use crate::runtime::LlmClient;
use crate::session::ChatTurn;
use serde::Serialize;

/// Everything needed to route one message
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    pub graph: &'a FlowGraph,
    /// `None` when the conversation has not entered the flow yet
    pub current_step_id: Option<&'a str>,
    pub message: &'a str,
    pub language: Language,
    /// Earlier turns, oldest first, without the current message
    pub history: &'a [ChatTurn],
}

/// Reply to send plus the position to store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOutcome {
    pub reply: String,
    pub buttons: Vec<FlowButton>,
    pub next_step_id: String,
    pub transition: Transition,
}

/// Resolver, classifier, fallback and executor wired together
pub struct RoutingEngine<L> {
    disambiguator: IntentDisambiguator<L>,
    fallback: FallbackResponder<L>,
}

impl<L: LlmClient + Clone> RoutingEngine<L> {
    pub fn new(llm: L, config: &RoutingConfig) -> Self {
        Self {
            disambiguator: IntentDisambiguator::new(llm.clone(), config.classify_attempts),
            fallback: FallbackResponder::new(llm),
        }
    }

    pub async fn route(&self, request: RouteRequest<'_>) -> RouteOutcome {
        let RouteRequest {
            graph,
            current_step_id,
            message,
            language,
            history,
        } = request;

        let Some(current) = current_step_id else {
            let start = graph.start_step();
            tracing::info!(step = %start.id, "Conversation entered flow");
            let reply = materialize(graph, &start.id, language);
            return RouteOutcome {
                reply: reply.text,
                buttons: reply.buttons,
                next_step_id: start.id.clone(),
                transition: Transition::Entered,
            };
        };

        let Some(step) = graph.step(current) else {
            tracing::warn!(step = %current, "Current step is not part of the flow");
            return RouteOutcome {
                reply: language.technical_error().to_string(),
                buttons: Vec::new(),
                next_step_id: current.to_string(),
                transition: Transition::Stay {
                    cause: StayCause::UnknownStep,
                },
            };
        };

        let outgoing = graph.outgoing(current);
        let decision = if let Some(edge) = resolve_label(graph, current, message) {
            Decision::label(edge)
        } else if outgoing.is_empty() || message.trim().is_empty() {
            Decision::stay(current, StayCause::NoTransition)
        } else {
            let classification = self.disambiguator.classify(message, step, outgoing).await;
            decide(graph, current, &classification)
        };

        tracing::info!(
            from = %current,
            to = %decision.next_step_id,
            transition = ?decision.transition,
            "Message routed"
        );

        if decision.transition.is_stay() {
            let options = graph.available_options(current);
            let reply = self
                .fallback
                .respond(message, step, &options, language, history)
                .await;
            return RouteOutcome {
                reply,
                buttons: step.buttons.clone(),
                next_step_id: decision.next_step_id,
                transition: decision.transition,
            };
        }

        let reply = materialize(graph, &decision.next_step_id, language);
        RouteOutcome {
            reply: reply.text,
            buttons: reply.buttons,
            next_step_id: decision.next_step_id,
            transition: decision.transition,
        }
    }
}
