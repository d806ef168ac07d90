//! One deterministic evaluation step per passive text event.
//!
//! [`evaluate`] never touches storage: it takes the current plan, the rules
//! in order, and the sampling state, and returns a candidate plan plus the
//! updated sampling state. The caller decides what to persist.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::plan::{Plan, WidgetKind};

use super::matcher::{
    PatternCache, RateVars, RuleMatch, TemplateVars, interpolate, match_rule, normalize_text,
};
use super::number::parse_locale_number;
use super::types::{Rule, RuleAction, RuleStates, SamplingState, ValueSource};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// A line of text observed outside the user's direct control, such as OCR
/// output or a manual log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassiveEvent {
    pub event_type: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl PassiveEvent {
    pub fn new(event_type: impl Into<String>, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            text: text.into(),
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RulesOutcome {
    /// The plan after every fired rule has been applied, in rule order.
    pub candidate: Plan,
    /// Ids of rules that changed the candidate.
    pub fired: Vec<String>,
    /// Sampling state after this event.
    pub states: RuleStates,
    /// Ids of rules whose sampling state was updated.
    pub sampled: Vec<String>,
}

/// Run every enabled rule against `event`, in order.
pub fn evaluate(plan: &Plan, rules: &[Rule], states: &RuleStates, event: &PassiveEvent) -> RulesOutcome {
    evaluate_with(&PatternCache::new(), plan, rules, states, event)
}

/// [`evaluate`] reusing regex patterns compiled for earlier events.
pub fn evaluate_with(
    patterns: &PatternCache,
    plan: &Plan,
    rules: &[Rule],
    states: &RuleStates,
    event: &PassiveEvent,
) -> RulesOutcome {
    let normalized = normalize_text(&event.text);
    let mut outcome = RulesOutcome {
        candidate: plan.clone(),
        fired: Vec::new(),
        states: states.clone(),
        sampled: Vec::new(),
    };

    for rule in rules.iter().filter(|r| r.enabled) {
        let Some(matched) = match_rule(rule, &normalized, patterns) else {
            continue;
        };
        if apply_action(rule, &matched, &normalized, event.at, &mut outcome) {
            outcome.fired.push(rule.id.clone());
        }
    }

    outcome
}

/// Apply one matched rule to the candidate. Returns whether the plan was
/// mutated.
fn apply_action(
    rule: &Rule,
    matched: &RuleMatch,
    normalized: &str,
    at: DateTime<Utc>,
    outcome: &mut RulesOutcome,
) -> bool {
    let widget_id = rule.action.widget_id();
    let Some(widget) = outcome.candidate.find_widget_mut(widget_id) else {
        debug!(rule_id = %rule.id, widget_id, "rule matched but its widget does not exist");
        return false;
    };

    match (&rule.action, &mut widget.kind) {
        (RuleAction::SetTextWidget { template, .. }, WidgetKind::Text { text }) => {
            let vars = TemplateVars {
                text: normalized,
                matched: Some(matched),
                rate: None,
            };
            *text = interpolate(template, &vars);
            true
        }
        (RuleAction::IncrementCounter { amount, .. }, WidgetKind::Counter { value, .. }) => {
            *value = value.saturating_add(*amount);
            true
        }
        (
            RuleAction::TrackRate {
                template,
                value_source,
                unit,
                precision,
                min_seconds,
                ..
            },
            WidgetKind::Text { text },
        ) => {
            let raw = match value_source {
                ValueSource::Match0 => matched.group(0),
                ValueSource::Group(n) => matched.group(*n),
            };
            let Some(current) = parse_locale_number(raw) else {
                debug!(rule_id = %rule.id, raw, "rule matched but no number could be read");
                return false;
            };

            let previous = outcome.states.insert(
                rule.id.clone(),
                SamplingState {
                    last_value: current,
                    last_at: at,
                },
            );
            outcome.sampled.push(rule.id.clone());

            let Some(previous) = previous else {
                return false;
            };
            let elapsed_ms = (at - previous.last_at).num_milliseconds();
            let min_ms = i64::try_from(*min_seconds)
                .ok()
                .and_then(|s| s.checked_mul(1000))
                .unwrap_or(i64::MAX);
            if elapsed_ms <= 0 || elapsed_ms < min_ms {
                return false;
            }

            let rate = (current - previous.last_value) / (elapsed_ms as f64 / MS_PER_HOUR);
            let rate_text = format!("{rate:.prec$}", prec = *precision);
            let value_text = current.to_string();
            let vars = TemplateVars {
                text: normalized,
                matched: Some(matched),
                rate: Some(RateVars {
                    rate: &rate_text,
                    unit,
                    value: &value_text,
                }),
            };
            *text = interpolate(template, &vars);
            true
        }
        (action, kind) => {
            debug!(
                rule_id = %rule.id,
                widget_id,
                widget_type = kind.type_name(),
                action = action_name(action),
                "rule matched but its widget has the wrong kind"
            );
            false
        }
    }
}

fn action_name(action: &RuleAction) -> &'static str {
    match action {
        RuleAction::SetTextWidget { .. } => "setTextWidget",
        RuleAction::IncrementCounter { .. } => "incrementCounter",
        RuleAction::TrackRate { .. } => "trackRate",
    }
}
