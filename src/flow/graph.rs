//! Validated, indexed view of a [`Flow`]
//!
//! A flow is checked once when it is loaded. After that every lookup the
//! routing engine performs is guaranteed to land on an existing step.

use super::model::{Flow, FlowButton, FlowEdge, FlowStep, StepKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// A single integrity violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("flow has no steps")]
    EmptyFlow,
    #[error("step at position {0} has an empty id")]
    EmptyStepId(usize),
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),
    #[error("edge '{edge}' references missing {endpoint} step '{step}'")]
    DanglingEdge {
        edge: String,
        endpoint: &'static str,
        step: String,
    },
    #[error("button '{label}' on step '{step}' points to missing step '{target}'")]
    DanglingButton {
        step: String,
        label: String,
        target: String,
    },
    #[error("more than one start step: {}", join_ids(.0))]
    MultipleStartSteps(Vec<String>),
}

/// All violations found in a flow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid flow: {}", join_errors(.errors))]
pub struct InvalidFlow {
    pub errors: Vec<FlowError>,
}

fn join_ids(ids: &[String]) -> String {
    ids.join(", ")
}

fn join_errors(errors: &[FlowError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Suspicious but routable shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowWarning {
    /// Two outgoing edges of one step share a label; the first one wins
    DuplicateLabel { step: String, label: String },
    /// Step cannot be reached from the start step
    Unreachable(String),
    /// No step without outgoing edges is reachable from the start step
    NoTerminalStep,
}

impl fmt::Display for FlowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowWarning::DuplicateLabel { step, label } => {
                write!(f, "step '{step}' has several edges labeled '{label}'")
            }
            FlowWarning::Unreachable(step) => {
                write!(f, "step '{step}' is not reachable from the start step")
            }
            FlowWarning::NoTerminalStep => {
                write!(f, "conversation never reaches a step without exits")
            }
        }
    }
}

/// Immutable, validated flow with lookup indexes
#[derive(Debug, Clone)]
pub struct FlowGraph {
    flow: Flow,
    index: HashMap<String, usize>,
    /// Outgoing edges per source, explicit edges first, button edges after
    outgoing: HashMap<String, Vec<FlowEdge>>,
    start: usize,
    warnings: Vec<FlowWarning>,
}

impl FlowGraph {
    /// Validate a flow and build its indexes
    pub fn new(flow: Flow) -> Result<Self, InvalidFlow> {
        let mut errors = Vec::new();

        if flow.steps.is_empty() {
            errors.push(FlowError::EmptyFlow);
        }

        let mut index = HashMap::with_capacity(flow.steps.len());
        for (pos, step) in flow.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                errors.push(FlowError::EmptyStepId(pos));
                continue;
            }
            if index.insert(step.id.clone(), pos).is_some() {
                errors.push(FlowError::DuplicateStep(step.id.clone()));
            }
        }

        for edge in &flow.edges {
            for (endpoint, step) in [("source", &edge.source), ("target", &edge.target)] {
                if !index.contains_key(step) {
                    errors.push(FlowError::DanglingEdge {
                        edge: edge.id.clone(),
                        endpoint,
                        step: step.clone(),
                    });
                }
            }
        }

        for step in &flow.steps {
            for button in &step.buttons {
                if let Some(target) = &button.target {
                    if !index.contains_key(target) {
                        errors.push(FlowError::DanglingButton {
                            step: step.id.clone(),
                            label: button.label.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        let starts: Vec<String> = flow
            .steps
            .iter()
            .filter(|s| s.kind == StepKind::Start)
            .map(|s| s.id.clone())
            .collect();
        if starts.len() > 1 {
            errors.push(FlowError::MultipleStartSteps(starts));
        }

        if !errors.is_empty() {
            return Err(InvalidFlow { errors });
        }

        let start = flow
            .steps
            .iter()
            .position(|s| s.kind == StepKind::Start)
            .unwrap_or(0);

        let outgoing = build_outgoing(&flow);

        let mut graph = Self {
            flow,
            index,
            outgoing,
            start,
            warnings: Vec::new(),
        };
        graph.warnings = graph.collect_warnings();

        for warning in &graph.warnings {
            tracing::debug!(warning = %warning, "Flow warning");
        }

        Ok(graph)
    }

    /// Look up a step by id
    pub fn step(&self, id: &str) -> Option<&FlowStep> {
        self.index.get(id).map(|&pos| &self.flow.steps[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The step typed `start`, or the first step if none is marked
    pub fn start_step(&self) -> &FlowStep {
        &self.flow.steps[self.start]
    }

    /// Outgoing edges of a step in routing priority order
    pub fn outgoing(&self, id: &str) -> &[FlowEdge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// First unlabeled outgoing edge, if any
    pub fn default_edge(&self, id: &str) -> Option<&FlowEdge> {
        self.outgoing(id).iter().find(|e| e.is_default())
    }

    /// Labels the user can pick from at a step: button labels first, then
    /// labels of outgoing edges that no button already shows
    pub fn available_options(&self, id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut options = Vec::new();

        let button_labels = self.buttons(id).iter().map(|b| b.label.trim());
        let edge_labels = self.outgoing(id).iter().filter_map(FlowEdge::trigger);

        for label in button_labels.chain(edge_labels) {
            if !label.is_empty() && seen.insert(label) {
                options.push(label.to_string());
            }
        }
        options
    }

    /// Buttons to render for a step
    pub fn buttons(&self, id: &str) -> &[FlowButton] {
        self.step(id)
            .map(|s| s.buttons.as_slice())
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> &[FlowWarning] {
        &self.warnings
    }

    /// The flow as authored
    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    fn collect_warnings(&self) -> Vec<FlowWarning> {
        let mut warnings = Vec::new();

        for step in &self.flow.steps {
            let mut labels = HashSet::new();
            let mut reported = HashSet::new();
            for label in self.outgoing(&step.id).iter().filter_map(FlowEdge::trigger) {
                if !labels.insert(label) && reported.insert(label) {
                    warnings.push(FlowWarning::DuplicateLabel {
                        step: step.id.clone(),
                        label: label.to_string(),
                    });
                }
            }
        }

        let reachable = self.reachable_from_start();
        for step in &self.flow.steps {
            if !reachable.contains(step.id.as_str()) {
                warnings.push(FlowWarning::Unreachable(step.id.clone()));
            }
        }

        if !reachable.iter().any(|id| self.outgoing(id).is_empty()) {
            warnings.push(FlowWarning::NoTerminalStep);
        }

        warnings
    }

    fn reachable_from_start(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([self.start_step().id.as_str()]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for edge in self.outgoing(id) {
                if !seen.contains(edge.target.as_str()) {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
        seen
    }
}

/// Group edges by source, then append one edge per targeted button whose
/// label no explicit edge of that step already carries
fn build_outgoing(flow: &Flow) -> HashMap<String, Vec<FlowEdge>> {
    let mut outgoing: HashMap<String, Vec<FlowEdge>> = HashMap::new();
    for edge in &flow.edges {
        outgoing
            .entry(edge.source.clone())
            .or_default()
            .push(edge.clone());
    }

    for step in &flow.steps {
        for (n, button) in step.buttons.iter().enumerate() {
            let Some(target) = &button.target else {
                continue;
            };
            let label = button.label.trim();
            if label.is_empty() {
                continue;
            }
            let edges = outgoing.entry(step.id.clone()).or_default();
            if edges.iter().any(|e| e.trigger() == Some(label)) {
                continue;
            }
            edges.push(FlowEdge::labeled(
                format!("{}:button:{n}", step.id),
                step.id.clone(),
                target.clone(),
                label,
            ));
        }
    }

    outgoing
}
