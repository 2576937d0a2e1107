//! Property-based tests for routing decisions
//!
//! - A message equal to an outgoing label resolves to that edge's target,
//!   whether or not the model is reachable
//! - A step without outgoing edges keeps the conversation in place and
//!   always produces a non-empty reply
//! - Resolving a shared label always lands on the same edge
//! - Serializing and re-parsing a flow does not change any decision

use super::{resolve_label, Language, RouteOutcome, RouteRequest, RoutingConfig, RoutingEngine};
use crate::flow::{Flow, FlowButton, FlowEdge, FlowGraph, FlowStep};
use crate::llm::{LlmError, LlmResponse};
use crate::runtime::testing::MockLlmClient;
use proptest::prelude::*;
use std::sync::Arc;

const LABELS: &[&str] = &["קביעת תור", "מחירים", "Hours", "Book", "שעות פתיחה", "Other"];

fn arb_label() -> impl Strategy<Value = String> {
    prop::sample::select(LABELS).prop_map(str::to_string)
}

fn arb_flow() -> impl Strategy<Value = Flow> {
    (2usize..7).prop_flat_map(|n| {
        let edges = proptest::collection::vec((0..n, 0..n, proptest::option::of(arb_label())), 0..14);
        let buttons = proptest::collection::vec(proptest::collection::vec(arb_label(), 0..3), n);
        (Just(n), edges, buttons).prop_map(|(n, edges, buttons)| Flow {
            steps: (0..n)
                .zip(buttons)
                .map(|(i, labels)| {
                    labels.into_iter().fold(
                        FlowStep::new(format!("s{i}"), format!("content of s{i}")),
                        |step, label| step.with_button(FlowButton::new(label)),
                    )
                })
                .collect(),
            edges: edges
                .into_iter()
                .enumerate()
                .map(|(i, (from, to, label))| FlowEdge {
                    id: format!("e{i}"),
                    source: format!("s{from}"),
                    target: format!("s{to}"),
                    label,
                })
                .collect(),
        })
    })
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Route with a model that fails every call
fn route_offline(graph: &FlowGraph, current: &str, message: &str) -> (RouteOutcome, usize) {
    let llm = Arc::new(MockLlmClient::new("offline"));
    for _ in 0..4 {
        llm.queue_error(LlmError::network("offline"));
    }
    let engine = RoutingEngine::new(llm.clone(), &RoutingConfig::default());
    let outcome = block_on(engine.route(RouteRequest {
        graph,
        current_step_id: Some(current),
        message,
        language: Language::Hebrew,
        history: &[],
    }));
    (outcome, llm.recorded_requests().len())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn label_match_is_deterministic_without_model(flow in arb_flow(), pick in any::<prop::sample::Index>()) {
        let labeled: Vec<&FlowEdge> = flow.edges.iter().filter(|e| e.trigger().is_some()).collect();
        prop_assume!(!labeled.is_empty());
        let edge = labeled[pick.index(labeled.len())];
        let label = edge.trigger().unwrap().to_string();
        let source = edge.source.clone();

        let graph = FlowGraph::new(flow.clone()).unwrap();
        let first = flow
            .edges
            .iter()
            .find(|e| e.source == source && e.trigger() == Some(label.as_str()))
            .unwrap();

        let (outcome, calls) = route_offline(&graph, &source, &label);
        prop_assert_eq!(&outcome.next_step_id, &first.target);
        prop_assert_eq!(calls, 0);
    }

    #[test]
    fn dead_end_stays_with_reply(flow in arb_flow(), message in "[a-zA-Z א-ת]{0,20}") {
        let graph = FlowGraph::new(flow.clone()).unwrap();
        for step in &flow.steps {
            if !graph.outgoing(&step.id).is_empty() {
                continue;
            }
            let (outcome, _) = route_offline(&graph, &step.id, &message);
            prop_assert_eq!(&outcome.next_step_id, &step.id);
            prop_assert!(outcome.transition.is_stay());
            prop_assert!(!outcome.reply.trim().is_empty());
            let options = graph.available_options(&step.id);
            if !options.is_empty() {
                prop_assert!(options.iter().any(|o| outcome.reply.contains(o.as_str())));
            }
        }
    }

    #[test]
    fn shared_label_resolution_is_idempotent(flow in arb_flow(), label in arb_label()) {
        let graph = FlowGraph::new(flow.clone()).unwrap();
        for step in &flow.steps {
            let first = resolve_label(&graph, &step.id, &label).map(|e| e.id.clone());
            for _ in 0..3 {
                let again = resolve_label(&graph, &step.id, &label).map(|e| e.id.clone());
                prop_assert_eq!(&again, &first);
            }
        }
    }

    #[test]
    fn json_round_trip_preserves_decisions(flow in arb_flow(), message in arb_label()) {
        let json = serde_json::to_string(&flow).unwrap();
        let reparsed: Flow = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(&reparsed, &flow);

        let original = FlowGraph::new(flow.clone()).unwrap();
        let restored = FlowGraph::new(reparsed).unwrap();
        for step in &flow.steps {
            let (a, _) = route_offline(&original, &step.id, &message);
            let (b, _) = route_offline(&restored, &step.id, &message);
            prop_assert_eq!(a, b);
        }
    }
}

#[test]
fn intent_match_reaches_labeled_target() {
    let graph = FlowGraph::new(Flow {
        steps: vec![
            FlowStep::new("start", "Hi"),
            FlowStep::new("book", "When?"),
            FlowStep::new("prices", "80"),
        ],
        edges: vec![
            FlowEdge::labeled("e1", "start", "book", "Book"),
            FlowEdge::labeled("e2", "start", "prices", "Prices"),
        ],
    })
    .unwrap();
    let llm = Arc::new(MockLlmClient::new("mock"));
    llm.queue_response(LlmResponse::text("prices"));
    let engine = RoutingEngine::new(llm, &RoutingConfig::default());

    let outcome = block_on(engine.route(RouteRequest {
        graph: &graph,
        current_step_id: Some("start"),
        message: "how much is a haircut?",
        language: Language::English,
        history: &[],
    }));
    assert_eq!(outcome.next_step_id, "prices");
    assert_eq!(outcome.reply, "80");
}
