//! Pure transition decisions
//!
//! Given the current step and whatever the resolver or the classifier came up
//! with, pick the next step. No I/O happens here.

use super::disambiguator::{Classification, ClassificationFailed};
use crate::flow::{FlowEdge, FlowGraph};
use serde::{Deserialize, Serialize};

/// Why a default edge was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultCause {
    NoIntentMatched,
    ClassificationFailed,
}

/// Why the conversation did not move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StayCause {
    /// Nothing matched and the step has no default edge
    NoTransition,
    /// The current step is not part of the flow
    UnknownStep,
}

/// How a message moved (or did not move) the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Transition {
    /// Conversation started at the start step
    Entered,
    /// Message equalled an edge label
    Label { edge_id: String },
    /// The model mapped the message to an edge
    Intent { edge_id: String },
    /// Fell through to the step's default edge
    Default { edge_id: String, cause: DefaultCause },
    Stay { cause: StayCause },
}

impl Transition {
    pub fn is_stay(&self) -> bool {
        matches!(self, Transition::Stay { .. })
    }
}

/// Next position plus how we got there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub next_step_id: String,
    pub transition: Transition,
}

impl Decision {
    pub fn label(edge: &FlowEdge) -> Self {
        Self {
            next_step_id: edge.target.clone(),
            transition: Transition::Label {
                edge_id: edge.id.clone(),
            },
        }
    }

    pub fn stay(current: &str, cause: StayCause) -> Self {
        Self {
            next_step_id: current.to_string(),
            transition: Transition::Stay { cause },
        }
    }
}

/// Decide where a classified message leads.
///
/// A match advances along the first outgoing edge to that target. No match
/// and a failed classification both fall through to the default edge when
/// the step has one, and stay put otherwise.
pub fn decide(
    graph: &FlowGraph,
    current: &str,
    classification: &Result<Classification, ClassificationFailed>,
) -> Decision {
    let cause = match classification {
        Ok(Classification::Matched { target }) => {
            if let Some(edge) = graph.outgoing(current).iter().find(|e| &e.target == target) {
                return Decision {
                    next_step_id: edge.target.clone(),
                    transition: Transition::Intent {
                        edge_id: edge.id.clone(),
                    },
                };
            }
            tracing::warn!(step = %current, target = %target, "Classified target is not an outgoing edge");
            DefaultCause::NoIntentMatched
        }
        Ok(Classification::NoIntentMatched) => DefaultCause::NoIntentMatched,
        Err(_) => DefaultCause::ClassificationFailed,
    };

    match graph.default_edge(current) {
        Some(edge) => Decision {
            next_step_id: edge.target.clone(),
            transition: Transition::Default {
                edge_id: edge.id.clone(),
                cause,
            },
        },
        None => Decision::stay(current, StayCause::NoTransition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Flow, FlowStep};
    use crate::llm::LlmError;

    fn graph(with_default: bool) -> FlowGraph {
        let mut edges = vec![FlowEdge::labeled("e1", "start", "book", "Book")];
        if with_default {
            edges.push(FlowEdge::default_to("e2", "start", "end"));
        }
        FlowGraph::new(Flow {
            steps: vec![
                FlowStep::new("start", "Hi"),
                FlowStep::new("book", "When?"),
                FlowStep::new("end", "Bye"),
            ],
            edges,
        })
        .unwrap()
    }

    fn failed() -> Result<Classification, ClassificationFailed> {
        Err(ClassificationFailed {
            attempts: 2,
            source: LlmError::network("down"),
        })
    }

    #[test]
    fn test_matched_advances_along_edge() {
        let d = decide(
            &graph(true),
            "start",
            &Ok(Classification::Matched {
                target: "book".into(),
            }),
        );
        assert_eq!(d.next_step_id, "book");
        assert_eq!(d.transition, Transition::Intent { edge_id: "e1".into() });
    }

    #[test]
    fn test_no_match_takes_default_edge() {
        let d = decide(&graph(true), "start", &Ok(Classification::NoIntentMatched));
        assert_eq!(d.next_step_id, "end");
        assert_eq!(
            d.transition,
            Transition::Default {
                edge_id: "e2".into(),
                cause: DefaultCause::NoIntentMatched
            }
        );
    }

    #[test]
    fn test_failure_is_distinguished_but_fails_open() {
        let d = decide(&graph(true), "start", &failed());
        assert_eq!(d.next_step_id, "end");
        assert!(matches!(
            d.transition,
            Transition::Default {
                cause: DefaultCause::ClassificationFailed,
                ..
            }
        ));

        let d = decide(&graph(false), "start", &failed());
        assert_eq!(d, Decision::stay("start", StayCause::NoTransition));
    }

    #[test]
    fn test_unknown_target_treated_as_no_match() {
        let d = decide(
            &graph(false),
            "start",
            &Ok(Classification::Matched {
                target: "end".into(),
            }),
        );
        assert!(d.transition.is_stay());
        assert_eq!(d.next_step_id, "start");
    }

    #[test]
    fn test_transition_wire_format() {
        let json = serde_json::to_value(Transition::Default {
            edge_id: "e2".into(),
            cause: DefaultCause::ClassificationFailed,
        })
        .unwrap();
        assert_eq!(json["kind"], "default");
        assert_eq!(json["edgeId"], "e2");
        assert_eq!(json["cause"], "classification_failed");
    }
}
