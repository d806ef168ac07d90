//! Plan validation.
//!
//! Validation runs in two passes over the whole widget tree and collects
//! every violation instead of stopping at the first one:
//! - The structural pass checks the document shape: version, ids and their
//!   uniqueness, kind-specific field constraints, nesting depth.
//! - The semantic pass checks each widget's required fields and
//!   calculations, running the formula validator with the identifiers that
//!   are in scope at each calculation.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::formula::{is_identifier, validate_formula};

use super::model::{Layout, PLAN_VERSION, Plan, Widget, WidgetKind};

/// Longest text a text widget may hold, in characters.
pub const MAX_TEXT_CHARS: usize = 10_000;

/// Deepest allowed panel nesting. Top-level widgets are at depth 1.
pub const MAX_PANEL_DEPTH: usize = 8;

/// One failed check, located by a JSON-ish path into the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Every violation found in a plan, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Whether any violation is located at `path`.
    pub fn has_path(&self, path: &str) -> bool {
        self.violations.iter().any(|v| v.path == path)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan is invalid ({} violation", self.violations.len())?;
        if self.violations.len() != 1 {
            write!(f, "s")?;
        }
        write!(f, ")")?;
        for v in &self.violations {
            write!(f, "\n  - {v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// Validate a plan. Returns every violation at once on failure.
pub fn validate_plan(plan: &Plan) -> Result<(), ValidationReport> {
    let mut v = Collector::default();

    if plan.version != PLAN_VERSION {
        v.push(
            "version",
            format!("unsupported version {:?} (expected {PLAN_VERSION:?})", plan.version),
        );
    }
    if plan.profile_id.trim().is_empty() {
        v.push("profileId", "must not be empty");
    }

    let mut seen_ids: HashMap<&str, String> = HashMap::new();
    structural_pass(&plan.widgets, "widgets", 1, &mut seen_ids, &mut v);

    for (path, widget) in plan.walk() {
        semantic_check(widget, &path, &mut v);
    }

    if v.violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationReport {
            violations: v.violations,
        })
    }
}

#[derive(Default)]
struct Collector {
    violations: Vec<Violation>,
}

impl Collector {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation {
            path: path.into(),
            message: message.into(),
        });
    }
}

fn structural_pass<'a>(
    widgets: &'a [Widget],
    prefix: &str,
    depth: usize,
    seen_ids: &mut HashMap<&'a str, String>,
    v: &mut Collector,
) {
    for (idx, widget) in widgets.iter().enumerate() {
        let path = format!("{prefix}[{idx}]");

        if widget.id.trim().is_empty() {
            v.push(format!("{path}.id"), "widget id must not be empty");
        } else if let Some(first) = seen_ids.get(widget.id.as_str()) {
            v.push(
                format!("{path}.id"),
                format!("duplicate widget id {:?} at {first} and {path}", widget.id),
            );
        } else {
            seen_ids.insert(widget.id.as_str(), path.clone());
        }

        if let Some(layout) = &widget.layout {
            check_layout(layout, &path, v);
        }

        check_kind(widget, &path, v);

        if let WidgetKind::Panel { children } = &widget.kind {
            if depth >= MAX_PANEL_DEPTH && !children.is_empty() {
                v.push(
                    format!("{path}.children"),
                    format!("panels may nest at most {MAX_PANEL_DEPTH} levels deep"),
                );
            } else {
                structural_pass(children, &format!("{path}.children"), depth + 1, seen_ids, v);
            }
        }
    }
}

fn check_layout(layout: &Layout, path: &str, v: &mut Collector) {
    let fields = [
        ("x", layout.x),
        ("y", layout.y),
        ("width", layout.width),
        ("height", layout.height),
    ];
    for (name, value) in fields {
        if !value.is_finite() {
            v.push(format!("{path}.layout.{name}"), "must be a finite number");
        }
    }
    if layout.width < 0.0 {
        v.push(format!("{path}.layout.width"), "must not be negative");
    }
    if layout.height < 0.0 {
        v.push(format!("{path}.layout.height"), "must not be negative");
    }
}

fn check_kind(widget: &Widget, path: &str, v: &mut Collector) {
    match &widget.kind {
        WidgetKind::Text { text } => {
            let chars = text.chars().count();
            if chars > MAX_TEXT_CHARS {
                v.push(
                    format!("{path}.text"),
                    format!("text is {chars} characters long (limit {MAX_TEXT_CHARS})"),
                );
            }
        }
        WidgetKind::Counter { .. } | WidgetKind::Panel { .. } => {}
        WidgetKind::Timer {
            duration_seconds,
            running,
            started_at,
            ..
        } => {
            if *duration_seconds == Some(0) {
                v.push(
                    format!("{path}.durationSeconds"),
                    "countdown duration must be positive",
                );
            }
            if *running && started_at.is_none() {
                v.push(
                    format!("{path}.startedAt"),
                    "a running timer must record when it started",
                );
            }
        }
        WidgetKind::Checklist { items } => {
            let mut seen = HashSet::new();
            for (idx, item) in items.iter().enumerate() {
                let item_path = format!("{path}.items[{idx}]");
                if item.id.trim().is_empty() {
                    v.push(format!("{item_path}.id"), "item id must not be empty");
                } else if !seen.insert(item.id.as_str()) {
                    v.push(
                        format!("{item_path}.id"),
                        format!("duplicate checklist item id {:?}", item.id),
                    );
                }
                if item.label.trim().is_empty() {
                    v.push(format!("{item_path}.label"), "item label must not be empty");
                }
            }
        }
        WidgetKind::EventLog {
            entries,
            max_entries,
        } => {
            if *max_entries == 0 {
                v.push(format!("{path}.maxEntries"), "must be at least 1");
            } else if entries.len() > *max_entries {
                v.push(
                    format!("{path}.entries"),
                    format!(
                        "holds {} entries but maxEntries is {max_entries}",
                        entries.len()
                    ),
                );
            }
        }
        WidgetKind::Rate {
            unit,
            window_seconds,
            value,
        } => {
            check_unit(unit, path, v);
            if *window_seconds == 0 {
                v.push(format!("{path}.windowSeconds"), "must be positive");
            }
            if value.is_some_and(|x| !x.is_finite()) {
                v.push(format!("{path}.value"), "must be a finite number");
            }
        }
        WidgetKind::Projection {
            current,
            target,
            rate_per_hour,
            unit,
        } => {
            check_unit(unit, path, v);
            if !current.is_finite() {
                v.push(format!("{path}.current"), "must be a finite number");
            }
            if !target.is_finite() {
                v.push(format!("{path}.target"), "must be a finite number");
            } else if *target == 0.0 {
                v.push(format!("{path}.target"), "must not be zero");
            }
            if rate_per_hour.is_some_and(|x| !x.is_finite()) {
                v.push(format!("{path}.ratePerHour"), "must be a finite number");
            }
        }
        WidgetKind::Custom {
            kind,
            required_fields,
            values,
            ..
        } => {
            if kind.trim().is_empty() {
                v.push(format!("{path}.kind"), "custom widget kind must not be empty");
            }
            let required: HashSet<&str> =
                required_fields.iter().map(|f| f.key.as_str()).collect();
            for (key, value) in values {
                if !required.contains(key.as_str()) {
                    v.push(
                        format!("{path}.values.{key}"),
                        format!("{key:?} is not a required field of this widget"),
                    );
                } else if !value.is_finite() {
                    v.push(format!("{path}.values.{key}"), "must be a finite number");
                }
            }
        }
    }
}

fn check_unit(unit: &str, path: &str, v: &mut Collector) {
    if unit.trim().is_empty() {
        v.push(format!("{path}.unit"), "unit must not be empty");
    }
}

/// Required-field and calculation checks for one widget.
fn semantic_check(widget: &Widget, path: &str, v: &mut Collector) {
    let mut required: HashSet<String> = HashSet::new();
    for (idx, key) in widget.required_keys().into_iter().enumerate() {
        let key_path = format!("{path}.requiredFields[{idx}].key");
        if !is_identifier(key) {
            v.push(key_path, format!("{key:?} is not a valid identifier"));
        } else if !required.insert(key.to_string()) {
            v.push(key_path, format!("duplicate required field {key:?}"));
        }
    }

    let mut accepted: HashSet<String> = HashSet::new();
    for (idx, calc) in widget.calculations.iter().enumerate() {
        let calc_path = format!("{path}.calculations[{idx}]");
        let mut key_ok = true;

        if !is_identifier(&calc.key) {
            v.push(
                format!("{calc_path}.key"),
                format!("{:?} is not a valid identifier", calc.key),
            );
            key_ok = false;
        } else if required.contains(&calc.key) {
            v.push(
                format!("{calc_path}.key"),
                format!("{:?} collides with a required field", calc.key),
            );
            key_ok = false;
        } else if accepted.contains(&calc.key) {
            v.push(
                format!("{calc_path}.key"),
                format!("{:?} is already defined by an earlier calculation", calc.key),
            );
            key_ok = false;
        }

        let allowed: HashSet<String> = required.union(&accepted).cloned().collect();
        let formula_ok = match validate_formula(&calc.formula, &allowed) {
            Ok(()) => true,
            Err(e) => {
                v.push(format!("{calc_path}.formula"), e.to_string());
                false
            }
        };

        if key_ok && formula_ok {
            accepted.insert(calc.key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::plan::model::{Calculation, ChecklistItem, RequiredField};

    fn custom(id: &str, required: &[&str], calcs: &[(&str, &str)]) -> Widget {
        let mut w = Widget::with_kind(
            id,
            WidgetKind::Custom {
                kind: "stats".to_string(),
                required_fields: required
                    .iter()
                    .map(|k| RequiredField {
                        key: k.to_string(),
                        label: None,
                    })
                    .collect(),
                values: BTreeMap::new(),
                template: String::new(),
            },
        );
        w.calculations = calcs
            .iter()
            .map(|(key, formula)| Calculation {
                key: key.to_string(),
                formula: formula.to_string(),
            })
            .collect();
        w
    }

    fn plan_with(widgets: Vec<Widget>) -> Plan {
        let mut plan = Plan::new("main");
        plan.widgets = widgets;
        plan
    }

    #[test]
    fn default_plan_is_valid() {
        assert!(validate_plan(&Plan::default_for("main")).is_ok());
    }

    #[test]
    fn backward_references_validate() {
        let plan = plan_with(vec![custom(
            "kda",
            &["kills", "deaths", "assists"],
            &[
                ("ka", "kills + assists"),
                ("ratio", "ka / (deaths + 1)"),
            ],
        )]);
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn forward_reference_names_identifier() {
        let plan = plan_with(vec![custom(
            "kda",
            &["kills"],
            &[("ratio", "later * 2"), ("later", "kills")],
        )]);
        let report = validate_plan(&plan).unwrap_err();
        assert_eq!(report.violations.len(), 1);
        let v = &report.violations[0];
        assert_eq!(v.path, "widgets[0].calculations[0].formula");
        assert!(v.message.contains("\"later\""), "message: {}", v.message);
    }

    #[test]
    fn rejected_key_stays_out_of_scope() {
        // Neither `bad key` nor `b` is accepted, so `c` cannot reference `b`.
        let plan = plan_with(vec![custom(
            "w",
            &["a"],
            &[("bad key", "a"), ("b", "a +"), ("c", "b + 1")],
        )]);
        let report = validate_plan(&plan).unwrap_err();
        assert!(report.has_path("widgets[0].calculations[0].key"));
        assert!(report.has_path("widgets[0].calculations[1].formula"));
        assert!(report.has_path("widgets[0].calculations[2].formula"));
    }

    #[test]
    fn calculation_key_collisions() {
        let plan = plan_with(vec![custom(
            "w",
            &["a"],
            &[("a", "1"), ("b", "a"), ("b", "a * 2")],
        )]);
        let report = validate_plan(&plan).unwrap_err();
        let paths: Vec<&str> = report.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["widgets[0].calculations[0].key", "widgets[0].calculations[2].key"]
        );
    }

    #[test]
    fn invalid_required_keys() {
        let plan = plan_with(vec![custom("w", &["ok", "ok", "2bad"], &[])]);
        let report = validate_plan(&plan).unwrap_err();
        assert!(report.has_path("widgets[0].requiredFields[1].key"));
        assert!(report.has_path("widgets[0].requiredFields[2].key"));
    }

    #[test]
    fn duplicate_id_reports_both_positions() {
        let plan = plan_with(vec![Widget::text("w1", "a"), Widget::text("w1", "b")]);
        let report = validate_plan(&plan).unwrap_err();
        assert_eq!(report.violations.len(), 1);
        let msg = &report.violations[0].message;
        assert!(msg.contains("widgets[0]"), "message: {msg}");
        assert!(msg.contains("widgets[1]"), "message: {msg}");
    }

    #[test]
    fn duplicate_ids_across_nesting() {
        let plan = plan_with(vec![
            Widget::text("inner", "a"),
            Widget::panel("p", vec![Widget::counter("inner", 0)]),
        ]);
        let report = validate_plan(&plan).unwrap_err();
        assert_eq!(report.violations[0].path, "widgets[1].children[0].id");
    }

    #[test]
    fn collects_violations_across_the_tree() {
        let mut plan = plan_with(vec![
            Widget::text("", "x"),
            Widget::with_kind(
                "t",
                WidgetKind::Timer {
                    duration_seconds: Some(0),
                    running: true,
                    started_at: None,
                    elapsed_seconds: 0,
                },
            ),
            Widget::with_kind(
                "r",
                WidgetKind::Rate {
                    unit: " ".to_string(),
                    window_seconds: 0,
                    value: Some(f64::NAN),
                },
            ),
        ]);
        plan.version = "2.0".to_string();
        plan.profile_id = String::new();
        let report = validate_plan(&plan).unwrap_err();
        for path in [
            "version",
            "profileId",
            "widgets[0].id",
            "widgets[1].durationSeconds",
            "widgets[1].startedAt",
            "widgets[2].unit",
            "widgets[2].windowSeconds",
            "widgets[2].value",
        ] {
            assert!(report.has_path(path), "missing {path} in {report}");
        }
    }

    #[test]
    fn checklist_items_are_checked() {
        let plan = plan_with(vec![Widget::with_kind(
            "todo",
            WidgetKind::Checklist {
                items: vec![
                    ChecklistItem {
                        id: "a".to_string(),
                        label: "first".to_string(),
                        done: false,
                    },
                    ChecklistItem {
                        id: "a".to_string(),
                        label: "".to_string(),
                        done: true,
                    },
                ],
            },
        )]);
        let report = validate_plan(&plan).unwrap_err();
        assert!(report.has_path("widgets[0].items[1].id"));
        assert!(report.has_path("widgets[0].items[1].label"));
    }

    #[test]
    fn projection_target_must_be_nonzero() {
        let plan = plan_with(vec![Widget::with_kind(
            "proj",
            WidgetKind::Projection {
                current: 10.0,
                target: 0.0,
                rate_per_hour: None,
                unit: "xp".to_string(),
            },
        )]);
        let report = validate_plan(&plan).unwrap_err();
        assert!(report.has_path("widgets[0].target"));
    }

    #[test]
    fn text_length_is_bounded() {
        let plan = plan_with(vec![Widget::text("long", "x".repeat(MAX_TEXT_CHARS + 1))]);
        assert!(validate_plan(&plan).is_err());
        let plan = plan_with(vec![Widget::text("long", "x".repeat(MAX_TEXT_CHARS))]);
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn panel_depth_is_bounded() {
        let mut widget = Widget::text("leaf", "x");
        for depth in 0..MAX_PANEL_DEPTH {
            widget = Widget::panel(format!("p{depth}"), vec![widget]);
        }
        let report = validate_plan(&plan_with(vec![widget])).unwrap_err();
        assert_eq!(report.violations.len(), 1);
        assert!(report.violations[0].path.ends_with(".children"));
    }

    #[test]
    fn layout_must_be_sane() {
        let mut w = Widget::text("t", "x");
        w.layout = Some(Layout {
            x: 0.0,
            y: f64::INFINITY,
            width: -1.0,
            height: 10.0,
        });
        let report = validate_plan(&plan_with(vec![w])).unwrap_err();
        assert!(report.has_path("widgets[0].layout.y"));
        assert!(report.has_path("widgets[0].layout.width"));
    }

    #[test]
    fn custom_values_must_be_required_fields() {
        let mut w = custom("w", &["a"], &[]);
        if let WidgetKind::Custom { values, .. } = &mut w.kind {
            values.insert("a".to_string(), 1.0);
            values.insert("z".to_string(), 2.0);
        }
        let report = validate_plan(&plan_with(vec![w])).unwrap_err();
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].path, "widgets[0].values.z");
    }

    #[test]
    fn report_display_lists_violations() {
        let plan = plan_with(vec![Widget::text("w1", "a"), Widget::text("w1", "b")]);
        let text = validate_plan(&plan).unwrap_err().to_string();
        assert!(text.starts_with("plan is invalid (1 violation)"));
        assert!(text.contains("widgets[1].id"));
    }
}
