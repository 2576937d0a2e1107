//! Conversation routing engine
//!
//! For every inbound message: try a literal label match, ask the model to
//! classify the intent when that fails, fall through to the default edge, and
//! otherwise stay put with a generated clarification.

mod decision;
mod disambiguator;
mod engine;
mod executor;
mod fallback;
mod language;
mod resolver;

#[cfg(test)]
mod proptests;

#[allow(unused_imports)] // Public API re-exports
pub use decision::{decide, Decision, DefaultCause, StayCause, Transition};
pub use disambiguator::{Classification, ClassificationFailed, IntentDisambiguator, NO_MATCH};
pub use engine::{RouteOutcome, RouteRequest, RoutingEngine};
pub use executor::{materialize, StepReply};
pub use fallback::FallbackResponder;
pub use language::Language;
pub use resolver::resolve_label;

use std::str::FromStr;

/// Tuning knobs for the routing engine
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Total classification calls made when the model fails with a retryable error
    pub classify_attempts: u32,
    /// Earlier turns given to the fallback responder
    pub history_turns: usize,
    /// Language for bots that do not configure one
    pub default_language: Language,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            classify_attempts: 2,
            history_turns: 10,
            default_language: Language::Hebrew,
        }
    }
}

impl RoutingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            classify_attempts: parse_var(&lookup, "FLOWBOT_CLASSIFY_ATTEMPTS")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.classify_attempts),
            history_turns: parse_var(&lookup, "FLOWBOT_HISTORY_TURNS").unwrap_or(defaults.history_turns),
            default_language: lookup("FLOWBOT_DEFAULT_LANGUAGE")
                .map_or(defaults.default_language, |tag| Language::from_tag(&tag)),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
            None
        }
    }
}
