//! Literal label matching

use crate::flow::{FlowEdge, FlowGraph};

/// Outgoing edge of `current` whose label equals the trimmed message.
///
/// First match in edge order wins, so a label shared by several edges always
/// resolves to the same one.
pub fn resolve_label<'g>(graph: &'g FlowGraph, current: &str, message: &str) -> Option<&'g FlowEdge> {
    let text = message.trim();
    if text.is_empty() {
        return None;
    }
    graph
        .outgoing(current)
        .iter()
        .find(|edge| edge.trigger() == Some(text))
}
