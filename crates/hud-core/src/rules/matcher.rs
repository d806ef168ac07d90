//! Text matching and template interpolation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::types::{MatchMode, Rule};

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// What a rule matched in an event's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// The matched text (the pattern itself for `includes` rules).
    pub match0: String,
    /// Capture groups `g1..gN`; unmatched optional groups are empty.
    pub groups: Vec<String>,
}

impl RuleMatch {
    /// `match0` for index 0, otherwise the 1-based group. Missing groups
    /// resolve to the empty string.
    pub fn group(&self, index: usize) -> &str {
        if index == 0 {
            return &self.match0;
        }
        self.groups.get(index - 1).map(String::as_str).unwrap_or("")
    }
}

/// Distinct patterns kept before the cache starts over.
const MAX_CACHED_PATTERNS: usize = 256;

/// Compiled regex rule patterns, keyed by pattern text and shared by clones.
///
/// Invalid patterns are remembered too, so they are reported once.
#[derive(Debug, Clone, Default)]
pub struct PatternCache {
    compiled: Arc<Mutex<HashMap<String, Option<Regex>>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compiled pattern of a regex rule, or `None` if it does not
    /// compile.
    pub fn regex(&self, rule: &Rule) -> Option<Regex> {
        let mut compiled = self.compiled.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = compiled.get(&rule.pattern) {
            return entry.clone();
        }
        if compiled.len() >= MAX_CACHED_PATTERNS {
            compiled.clear();
        }

        let entry = match RegexBuilder::new(&rule.pattern)
            .case_insensitive(true)
            .build()
        {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(rule_id = %rule.id, error = %e, "skipping rule with invalid pattern");
                None
            }
        };
        compiled.insert(rule.pattern.clone(), entry.clone());
        entry
    }

    pub fn len(&self) -> usize {
        self.compiled.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Match `rule` against already-normalized text.
pub fn match_rule(rule: &Rule, normalized: &str, patterns: &PatternCache) -> Option<RuleMatch> {
    match rule.mode {
        MatchMode::Includes => {
            let needle = normalize_text(&rule.pattern).to_lowercase();
            if needle.is_empty() || !normalized.to_lowercase().contains(&needle) {
                return None;
            }
            Some(RuleMatch {
                match0: rule.pattern.clone(),
                groups: Vec::new(),
            })
        }
        MatchMode::Regex => {
            let re = patterns.regex(rule)?;
            let caps = re.captures(normalized)?;
            let match0 = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
            let groups = caps
                .iter()
                .skip(1)
                .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            Some(RuleMatch { match0, groups })
        }
    }
}

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub text: &'a str,
    pub matched: Option<&'a RuleMatch>,
    /// Set only for rate actions.
    pub rate: Option<RateVars<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateVars<'a> {
    pub rate: &'a str,
    pub unit: &'a str,
    pub value: &'a str,
}

/// Substitute `${...}` placeholders in a single left-to-right pass.
///
/// Substituted text is never rescanned. Unknown placeholders are kept as
/// written, except `${gN}` past the last group which becomes empty.
pub fn interpolate(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match resolve(name, vars) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn resolve<'a>(name: &str, vars: &'a TemplateVars<'a>) -> Option<&'a str> {
    match name {
        "text" => Some(vars.text),
        "match0" => Some(vars.matched.map(|m| m.match0.as_str()).unwrap_or("")),
        "rate" => vars.rate.map(|r| r.rate),
        "unit" => vars.rate.map(|r| r.unit),
        "value" => vars.rate.map(|r| r.value),
        _ => {
            let index = name
                .strip_prefix('g')
                .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))?
                .parse::<usize>()
                .ok()?;
            Some(vars.matched.map(|m| m.group(index)).unwrap_or(""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::RuleAction;

    fn rule(mode: MatchMode, pattern: &str) -> Rule {
        Rule {
            id: "r".to_string(),
            enabled: true,
            mode,
            pattern: pattern.to_string(),
            action: RuleAction::IncrementCounter {
                widget_id: "c".to_string(),
                amount: 1,
            },
        }
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_text("  Boss \t\n defeated  "), "Boss defeated");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn includes_is_case_insensitive() {
        let r = rule(MatchMode::Includes, "boss defeated");
        let m = match_rule(&r, &normalize_text("BOSS DEFEATED!"), &PatternCache::new()).unwrap();
        assert_eq!(m.match0, "boss defeated");
        assert!(m.groups.is_empty());
        assert!(match_rule(&r, "boss approaching", &PatternCache::new()).is_none());
    }

    #[test]
    fn includes_pattern_whitespace_is_normalized() {
        let r = rule(MatchMode::Includes, "boss   defeated");
        assert!(match_rule(&r, "the boss defeated you", &PatternCache::new()).is_some());
    }

    #[test]
    fn regex_captures_groups() {
        let r = rule(MatchMode::Regex, r"hp (\d+)/(\d+)( shield)?");
        let m = match_rule(&r, "HP 40/100 left", &PatternCache::new()).unwrap();
        assert_eq!(m.match0, "HP 40/100");
        assert_eq!(m.groups, vec!["40", "100", ""]);
        assert_eq!(m.group(2), "100");
        assert_eq!(m.group(9), "");
    }

    #[test]
    fn regex_takes_first_match_only() {
        let r = rule(MatchMode::Regex, r"\d+");
        let m = match_rule(&r, "a 1 b 2", &PatternCache::new()).unwrap();
        assert_eq!(m.match0, "1");
    }

    #[test]
    fn invalid_regex_never_fires() {
        let r = rule(MatchMode::Regex, "([");
        let patterns = PatternCache::new();
        assert!(match_rule(&r, "([", &patterns).is_none());
        assert!(match_rule(&r, "([", &patterns).is_none());
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn regex_is_compiled_once_per_pattern() {
        let patterns = PatternCache::new();
        let hp = rule(MatchMode::Regex, r"hp (\d+)");
        for text in ["hp 1", "hp 2", "mp 3"] {
            match_rule(&hp, text, &patterns);
        }
        assert_eq!(patterns.len(), 1);

        let shared = patterns.clone();
        match_rule(&rule(MatchMode::Regex, r"mp (\d+)"), "mp 3", &shared);
        match_rule(&rule(MatchMode::Includes, "hp"), "hp 1", &shared);
        assert_eq!(patterns.len(), 2);
        assert_eq!(match_rule(&hp, "HP 7", &shared).unwrap().groups, vec!["7"]);
    }

    #[test]
    fn interpolates_known_placeholders_once() {
        let m = RuleMatch {
            match0: "XP 12%".to_string(),
            groups: vec!["12".to_string()],
        };
        let vars = TemplateVars {
            text: "got ${g1}",
            matched: Some(&m),
            rate: None,
        };
        let out = interpolate("${match0} | ${g1} | ${g7} | ${text} | ${who}", &vars);
        assert_eq!(out, "XP 12% | 12 |  | got ${g1} | ${who}");
    }

    #[test]
    fn rate_placeholders_only_for_rate_actions() {
        let plain = TemplateVars {
            text: "x",
            matched: None,
            rate: None,
        };
        assert_eq!(interpolate("${rate} ${unit}", &plain), "${rate} ${unit}");

        let with_rate = TemplateVars {
            rate: Some(RateVars {
                rate: "138.46",
                unit: "%",
                value: "12.5",
            }),
            ..plain
        };
        assert_eq!(
            interpolate("${value}${unit} (${rate}/h)", &with_rate),
            "12.5% (138.46/h)"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let vars = TemplateVars::default();
        assert_eq!(interpolate("a ${text", &vars), "a ${text");
        assert_eq!(interpolate("$text {}", &vars), "$text {}");
    }
}
