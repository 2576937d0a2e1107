//! Conversation flow graphs
//!
//! Steps are the states a bot conversation can be in, edges are the
//! transitions between them. Flows are authored elsewhere and only read here.

mod graph;
mod model;

#[cfg(test)]
mod proptests;

pub use graph::{FlowError, FlowGraph, FlowWarning, InvalidFlow};
pub use model::{Flow, FlowButton, FlowEdge, FlowStep, StepKind};
