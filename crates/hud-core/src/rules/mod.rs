//! Deterministic rules that turn passive text events into plan changes.

pub mod engine;
pub mod matcher;
pub mod number;
pub mod types;

pub use engine::{PassiveEvent, RulesOutcome, evaluate, evaluate_with};
pub use matcher::{PatternCache, RuleMatch, interpolate, match_rule, normalize_text};
pub use number::parse_locale_number;
pub use types::{
    MatchMode, Rule, RuleAction, RuleError, RuleStates, SamplingState, ValueSource,
};
