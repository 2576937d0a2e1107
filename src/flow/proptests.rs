//! Property-based tests for flow validation

use super::{Flow, FlowButton, FlowEdge, FlowError, FlowGraph, FlowStep, StepKind};
use proptest::prelude::*;
use std::collections::HashSet;

/// A flow whose edges and buttons only reference existing steps
fn arb_valid_flow() -> impl Strategy<Value = Flow> {
    (1usize..8).prop_flat_map(|n| {
        let edges = proptest::collection::vec(
            (0..n, 0..n, proptest::option::of("[a-c]{1,2}")),
            0..16,
        );
        let buttons = proptest::collection::vec(
            proptest::collection::vec(("[a-d]{1,2}", proptest::option::of(0..n)), 0..4),
            n,
        );
        (Just(n), edges, buttons).prop_map(|(n, edges, buttons)| {
            let steps = (0..n)
                .zip(buttons)
                .map(|(i, buttons)| {
                    let mut step = FlowStep::new(format!("s{i}"), format!("content {i}"));
                    for (label, target) in buttons {
                        step = step.with_button(match target {
                            Some(t) => FlowButton::to(label, format!("s{t}")),
                            None => FlowButton::new(label),
                        });
                    }
                    step
                })
                .collect();
            let edges = edges
                .into_iter()
                .enumerate()
                .map(|(i, (from, to, label))| match label {
                    Some(label) => {
                        FlowEdge::labeled(format!("e{i}"), format!("s{from}"), format!("s{to}"), label)
                    }
                    None => FlowEdge::default_to(format!("e{i}"), format!("s{from}"), format!("s{to}")),
                })
                .collect();
            Flow { steps, edges }
        })
    })
}

proptest! {
    #[test]
    fn valid_flows_load(flow in arb_valid_flow()) {
        let graph = FlowGraph::new(flow.clone()).unwrap();
        for step in &flow.steps {
            for edge in graph.outgoing(&step.id) {
                prop_assert_eq!(&edge.source, &step.id);
                prop_assert!(graph.contains(&edge.target));
            }
        }
    }

    #[test]
    fn explicit_edges_keep_array_order(flow in arb_valid_flow()) {
        let graph = FlowGraph::new(flow.clone()).unwrap();
        for step in &flow.steps {
            let explicit: Vec<_> = flow.edges.iter().filter(|e| e.source == step.id).collect();
            let outgoing = graph.outgoing(&step.id);
            prop_assert!(outgoing.len() >= explicit.len());
            for (got, want) in outgoing.iter().zip(&explicit) {
                prop_assert_eq!(&got.id, &want.id);
            }
        }
    }

    #[test]
    fn options_are_unique_and_non_empty(flow in arb_valid_flow()) {
        let graph = FlowGraph::new(flow.clone()).unwrap();
        for step in &flow.steps {
            let options = graph.available_options(&step.id);
            let unique: HashSet<_> = options.iter().collect();
            prop_assert_eq!(unique.len(), options.len());
            prop_assert!(options.iter().all(|o| !o.trim().is_empty()));
        }
    }

    #[test]
    fn dangling_target_is_rejected(flow in arb_valid_flow(), ghost in "[x-z]{3}") {
        let mut flow = flow;
        let source = flow.steps[0].id.clone();
        flow.edges.push(FlowEdge::default_to("ghost-edge", source, ghost.clone()));
        let err = FlowGraph::new(flow).unwrap_err();
        let has_ghost = err.errors.contains(&FlowError::DanglingEdge {
            edge: "ghost-edge".to_string(),
            endpoint: "target",
            step: ghost,
        });
        prop_assert!(has_ghost);
    }

    #[test]
    fn marked_start_wins(flow in arb_valid_flow(), pick in any::<prop::sample::Index>()) {
        let mut flow = flow;
        let i = pick.index(flow.steps.len());
        flow.steps[i].kind = StepKind::Start;
        let expected = flow.steps[i].id.clone();
        let graph = FlowGraph::new(flow).unwrap();
        prop_assert_eq!(&graph.start_step().id, &expected);
    }
}
