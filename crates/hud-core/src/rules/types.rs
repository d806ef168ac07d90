//! Rule definitions and per-rule sampling state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formula::is_identifier;

/// Highest accepted `precision` of a rate action.
pub const MAX_PRECISION: usize = 10;

/// How a rule's pattern is compared against event text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Case-insensitive substring.
    Includes,
    /// Case-insensitive regular expression, first match only.
    Regex,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Includes => f.write_str("includes"),
            MatchMode::Regex => f.write_str("regex"),
        }
    }
}

/// Where a rate action reads its number from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueSource {
    /// The whole match.
    #[default]
    Match0,
    /// A 1-based capture group.
    Group(usize),
}

impl TryFrom<String> for ValueSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "match0" {
            return Ok(Self::Match0);
        }
        value
            .strip_prefix('g')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .map(Self::Group)
            .ok_or_else(|| format!("invalid value source {value:?} (expected match0 or g1, g2, ...)"))
    }
}

impl From<ValueSource> for String {
    fn from(value: ValueSource) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Match0 => f.write_str("match0"),
            ValueSource::Group(n) => write!(f, "g{n}"),
        }
    }
}

/// What a rule does to the plan when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    #[serde(rename_all = "camelCase")]
    SetTextWidget { widget_id: String, template: String },

    #[serde(rename_all = "camelCase")]
    IncrementCounter {
        widget_id: String,
        #[serde(default = "default_amount")]
        amount: i64,
    },

    #[serde(rename_all = "camelCase")]
    TrackRate {
        widget_id: String,
        template: String,
        #[serde(default)]
        value_source: ValueSource,
        #[serde(default)]
        unit: String,
        #[serde(default = "default_precision")]
        precision: usize,
        #[serde(default = "default_min_seconds")]
        min_seconds: u64,
    },
}

fn default_amount() -> i64 {
    1
}

fn default_precision() -> usize {
    2
}

fn default_min_seconds() -> u64 {
    60
}

impl RuleAction {
    pub fn widget_id(&self) -> &str {
        match self {
            Self::SetTextWidget { widget_id, .. }
            | Self::IncrementCounter { widget_id, .. }
            | Self::TrackRate { widget_id, .. } => widget_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub mode: MatchMode,
    pub pattern: String,
    pub action: RuleAction,
}

fn default_enabled() -> bool {
    true
}

/// Last value sampled by a rate rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingState {
    pub last_value: f64,
    pub last_at: DateTime<Utc>,
}

/// Sampling state of every rate rule, keyed by rule id.
pub type RuleStates = BTreeMap<String, SamplingState>;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule id {0:?} must be a non-empty identifier-like name")]
    InvalidId(String),

    #[error("rule {0:?} has an empty pattern")]
    EmptyPattern(String),

    #[error("rule {rule:?} has an invalid regex: {source}")]
    InvalidRegex {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule {0:?} targets an empty widget id")]
    MissingWidget(String),

    #[error("rule {rule:?} asks for precision {precision} (at most {MAX_PRECISION})")]
    Precision { rule: String, precision: usize },

    #[error("rule definition is not valid JSON: {0}")]
    Definition(#[from] serde_json::Error),
}

impl Rule {
    /// Check a rule before it is stored.
    pub fn validate(&self) -> Result<(), RuleError> {
        if !is_rule_id(&self.id) {
            return Err(RuleError::InvalidId(self.id.clone()));
        }
        if self.pattern.trim().is_empty() {
            return Err(RuleError::EmptyPattern(self.id.clone()));
        }
        if self.mode == MatchMode::Regex {
            Regex::new(&self.pattern).map_err(|source| RuleError::InvalidRegex {
                rule: self.id.clone(),
                source,
            })?;
        }
        if self.action.widget_id().trim().is_empty() {
            return Err(RuleError::MissingWidget(self.id.clone()));
        }
        if let RuleAction::TrackRate { precision, .. } = &self.action {
            if *precision > MAX_PRECISION {
                return Err(RuleError::Precision {
                    rule: self.id.clone(),
                    precision: *precision,
                });
            }
        }
        Ok(())
    }

    /// Parse and validate a rule from its JSON definition.
    pub fn from_json(raw: &str) -> Result<Self, RuleError> {
        let rule: Rule = serde_json::from_str(raw)?;
        rule.validate()?;
        Ok(rule)
    }
}

/// Rule ids are identifiers that may also contain `-`.
fn is_rule_id(id: &str) -> bool {
    !id.is_empty() && is_identifier(&id.replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_rule_with_defaults() {
        let raw = r#"{
            "id": "xp-rate",
            "mode": "regex",
            "pattern": "xp\\s+([0-9.,]+)%",
            "action": {"type": "trackRate", "widgetId": "xp", "template": "${rate} ${unit}/h", "valueSource": "g1", "unit": "%"}
        }"#;
        let rule = Rule::from_json(raw).unwrap();
        assert!(rule.enabled);
        assert_eq!(
            rule.action,
            RuleAction::TrackRate {
                widget_id: "xp".to_string(),
                template: "${rate} ${unit}/h".to_string(),
                value_source: ValueSource::Group(1),
                unit: "%".to_string(),
                precision: 2,
                min_seconds: 60,
            }
        );
    }

    #[test]
    fn value_source_wire_format() {
        assert_eq!(
            ValueSource::try_from("match0".to_string()),
            Ok(ValueSource::Match0)
        );
        assert_eq!(
            ValueSource::try_from("g12".to_string()),
            Ok(ValueSource::Group(12))
        );
        assert!(ValueSource::try_from("g0".to_string()).is_err());
        assert!(ValueSource::try_from("group1".to_string()).is_err());
        assert_eq!(String::from(ValueSource::Group(3)), "g3");
    }

    #[test]
    fn action_tag_is_camel_case() {
        let action = RuleAction::IncrementCounter {
            widget_id: "deaths".to_string(),
            amount: -1,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "incrementCounter");
        assert_eq!(value["widgetId"], "deaths");
    }

    #[test]
    fn rejects_invalid_rules() {
        let bad_regex = r#"{"id": "r", "mode": "regex", "pattern": "([", "action": {"type": "setTextWidget", "widgetId": "w", "template": "x"}}"#;
        assert!(matches!(
            Rule::from_json(bad_regex),
            Err(RuleError::InvalidRegex { .. })
        ));

        let bad_id = r#"{"id": "has space", "mode": "includes", "pattern": "p", "action": {"type": "setTextWidget", "widgetId": "w", "template": "x"}}"#;
        assert!(matches!(Rule::from_json(bad_id), Err(RuleError::InvalidId(_))));

        let empty = r#"{"id": "r", "mode": "includes", "pattern": "  ", "action": {"type": "setTextWidget", "widgetId": "w", "template": "x"}}"#;
        assert!(matches!(Rule::from_json(empty), Err(RuleError::EmptyPattern(_))));

        let no_widget = r#"{"id": "r", "mode": "includes", "pattern": "p", "action": {"type": "incrementCounter", "widgetId": ""}}"#;
        assert!(matches!(
            Rule::from_json(no_widget),
            Err(RuleError::MissingWidget(_))
        ));

        assert!(matches!(
            Rule::from_json("{"),
            Err(RuleError::Definition(_))
        ));
    }

    #[test]
    fn precision_is_bounded() {
        let raw = r#"{"id": "r", "mode": "includes", "pattern": "p", "action": {"type": "trackRate", "widgetId": "w", "template": "${rate}", "precision": 11}}"#;
        assert!(matches!(Rule::from_json(raw), Err(RuleError::Precision { .. })));
    }
}
