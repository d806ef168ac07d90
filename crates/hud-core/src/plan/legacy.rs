//! Import of the legacy profile format.
//!
//! Older profiles only stored widget rectangles and the monitor they were
//! laid out on:
//!
//! ```json
//! {"selectedMonitorId": "DISPLAY1", "widgets": [{"id": "a", "type": "timer", "x": 0, "y": 0, "width": 200, "height": 80}]}
//! ```
//!
//! Each rectangle becomes a widget of the matching kind with its layout
//! preserved. Kinds the current format does not know become text widgets
//! titled with the old type name.

use std::collections::HashSet;

use serde::Deserialize;

use super::model::{Layout, MalformedPlan, Plan, Widget, WidgetKind};

/// `selectedMonitorId` has no counterpart in a plan and is ignored.
#[derive(Debug, Deserialize)]
struct LegacyProfile {
    #[serde(default)]
    widgets: Vec<LegacyWidget>,
}

#[derive(Debug, Deserialize)]
struct LegacyWidget {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    type_name: String,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
}

/// Convert a legacy profile document into a plan for `profile_id`.
///
/// Empty ids are replaced by `widget-<index>`; repeated ids get a numeric
/// suffix so the result always has unique ids.
pub fn migrate_legacy_profile(raw: &str, profile_id: &str) -> Result<Plan, MalformedPlan> {
    if raw.trim().is_empty() {
        return Err(MalformedPlan::Empty);
    }
    let legacy: LegacyProfile = serde_json::from_str(raw).map_err(|e| match e.classify() {
        serde_json::error::Category::Data => MalformedPlan::Shape(e),
        _ => MalformedPlan::Syntax(e),
    })?;

    let mut plan = Plan::new(profile_id);
    let mut used: HashSet<String> = HashSet::new();

    for (idx, old) in legacy.widgets.into_iter().enumerate() {
        let base = if old.id.trim().is_empty() {
            format!("widget-{idx}")
        } else {
            old.id.trim().to_string()
        };
        let mut id = base.clone();
        let mut n = 2;
        while !used.insert(id.clone()) {
            id = format!("{base}-{n}");
            n += 1;
        }

        let mut widget = convert_kind(id, &old.type_name);
        widget.layout = Some(Layout {
            x: finite_or_zero(old.x),
            y: finite_or_zero(old.y),
            width: finite_or_zero(old.width).max(0.0),
            height: finite_or_zero(old.height).max(0.0),
        });
        plan.widgets.push(widget);
    }

    Ok(plan)
}

fn convert_kind(id: String, type_name: &str) -> Widget {
    let normalized = type_name.trim().to_ascii_lowercase().replace('-', "_");
    let kind = match normalized.as_str() {
        "text" => WidgetKind::Text {
            text: String::new(),
        },
        "counter" => WidgetKind::Counter { value: 0, step: 1 },
        "timer" => WidgetKind::Timer {
            duration_seconds: None,
            running: false,
            started_at: None,
            elapsed_seconds: 0,
        },
        "checklist" => WidgetKind::Checklist { items: Vec::new() },
        "event_log" | "eventlog" => WidgetKind::EventLog {
            entries: Vec::new(),
            max_entries: 20,
        },
        _ => {
            let title = if normalized.is_empty() {
                "widget".to_string()
            } else {
                type_name.trim().to_string()
            };
            return Widget::text(id, "").titled(title);
        }
    };
    Widget::with_kind(id, kind)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
