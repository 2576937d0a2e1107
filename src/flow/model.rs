//! Authored flow types
//!
//! These mirror the JSON the bot builder saves. They are plain data; all
//! integrity checks live in [`super::FlowGraph`].

use serde::{Deserialize, Serialize};

/// Role of a step in the conversation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Entry point of the conversation
    Start,
    /// Ordinary conversational step
    #[default]
    Message,
    /// Terminal step (no special handling, it simply has no outgoing edges)
    End,
}

/// Quick-reply button rendered under a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowButton {
    pub label: String,
    /// Step to jump to when the button is pressed
    #[serde(default, alias = "go", skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl FlowButton {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: None,
        }
    }

    pub fn to(label: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: Some(target.into()),
        }
    }
}

/// One conversational turn the bot can be in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStep {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<FlowButton>,
}

impl FlowStep {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Message,
            title: None,
            content: content.into(),
            buttons: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: StepKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_button(mut self, button: FlowButton) -> Self {
        self.buttons.push(button);
        self
    }
}

/// Directed transition between two steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Literal text that triggers the edge. Absent or blank means default edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FlowEdge {
    pub fn labeled(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: Some(label.into()),
        }
    }

    pub fn default_to(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
        }
    }

    /// Trimmed trigger label, `None` for default edges
    pub fn trigger(&self) -> Option<&str> {
        self.label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    pub fn is_default(&self) -> bool {
        self.trigger().is_none()
    }
}

/// The whole graph for one bot version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Flow {
    #[serde(default)]
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}
