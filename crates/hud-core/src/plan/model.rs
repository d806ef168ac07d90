//! Plan and widget types.
//!
//! These types map directly to the JSON plan format consumed by the overlay
//! renderer and produced by the composer. Field names are camelCase on the
//! wire; the widget kind is carried in a `type` tag.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// The only plan format version this crate reads and writes.
pub const PLAN_VERSION: &str = "1.0";

/// Top-level plan document describing every widget of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub version: String,
    pub profile_id: String,
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

/// A single widget. `id` is unique across the whole plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(flatten)]
    pub kind: WidgetKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calculations: Vec<Calculation>,
}

/// Screen rectangle of a widget, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A named, formula-derived field. Validated, never evaluated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculation {
    pub key: String,
    pub formula: String,
}

/// An input field a templated widget expects to be filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredField {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One line of a checklist widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub done: bool,
}

/// Kind-specific widget content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetKind {
    Text {
        #[serde(default)]
        text: String,
    },
    Counter {
        #[serde(default)]
        value: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
    #[serde(rename_all = "camelCase")]
    Timer {
        /// Countdown length; `None` makes the timer a stopwatch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<u64>,
        #[serde(default)]
        running: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        #[serde(default)]
        elapsed_seconds: u64,
    },
    Checklist {
        #[serde(default)]
        items: Vec<ChecklistItem>,
    },
    Panel {
        #[serde(default)]
        children: Vec<Widget>,
    },
    #[serde(rename_all = "camelCase")]
    EventLog {
        #[serde(default)]
        entries: Vec<String>,
        #[serde(default = "default_max_entries")]
        max_entries: usize,
    },
    #[serde(rename_all = "camelCase")]
    Rate {
        unit: String,
        #[serde(default = "default_window_seconds")]
        window_seconds: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Projection {
        current: f64,
        target: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rate_per_hour: Option<f64>,
        unit: String,
    },
    /// Generic templated widget. `kind` is a free-form label such as
    /// `"kda"`; `requiredFields` name the inputs that calculations may use.
    #[serde(rename_all = "camelCase")]
    Custom {
        kind: String,
        #[serde(default)]
        required_fields: Vec<RequiredField>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        values: BTreeMap<String, f64>,
        #[serde(default)]
        template: String,
    },
}

fn default_step() -> i64 {
    1
}

fn default_max_entries() -> usize {
    20
}

fn default_window_seconds() -> u64 {
    3600
}

impl WidgetKind {
    /// Wire name of the kind, as written in the `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Counter { .. } => "counter",
            Self::Timer { .. } => "timer",
            Self::Checklist { .. } => "checklist",
            Self::Panel { .. } => "panel",
            Self::EventLog { .. } => "event_log",
            Self::Rate { .. } => "rate",
            Self::Projection { .. } => "projection",
            Self::Custom { .. } => "custom",
        }
    }
}

impl Widget {
    /// A text widget with the given content.
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_kind(id, WidgetKind::Text { text: text.into() })
    }

    /// A counter widget starting at `value`.
    pub fn counter(id: impl Into<String>, value: i64) -> Self {
        Self::with_kind(id, WidgetKind::Counter { value, step: 1 })
    }

    /// A panel grouping `children`.
    pub fn panel(id: impl Into<String>, children: Vec<Widget>) -> Self {
        Self::with_kind(id, WidgetKind::Panel { children })
    }

    pub fn with_kind(id: impl Into<String>, kind: WidgetKind) -> Self {
        Self {
            id: id.into(),
            title: None,
            layout: None,
            kind,
            calculations: Vec::new(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Keys of the widget's required fields, in declaration order.
    pub fn required_keys(&self) -> Vec<&str> {
        match &self.kind {
            WidgetKind::Custom {
                required_fields, ..
            } => required_fields.iter().map(|f| f.key.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Nested widgets, empty for every kind except panels.
    pub fn children(&self) -> &[Widget] {
        match &self.kind {
            WidgetKind::Panel { children } => children,
            _ => &[],
        }
    }
}

/// Errors from reading a plan out of untrusted text.
#[derive(Debug, Error)]
pub enum MalformedPlan {
    #[error("plan input is empty")]
    Empty,

    #[error("plan is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    #[error("input is not shaped like a plan: {0}")]
    Shape(#[source] serde_json::Error),
}

impl Plan {
    /// An empty plan for `profile_id`.
    pub fn new(profile_id: impl Into<String>) -> Self {
        Self {
            version: PLAN_VERSION.to_string(),
            profile_id: profile_id.into(),
            widgets: Vec::new(),
        }
    }

    /// The plan a freshly initialized profile starts with.
    pub fn default_for(profile_id: impl Into<String>) -> Self {
        let mut plan = Self::new(profile_id);
        plan.widgets = vec![
            Widget::text("status", "Waiting for events").titled("Status"),
            Widget::counter("events", 0).titled("Events"),
        ];
        plan
    }

    /// Parse a plan from JSON text without validating it.
    pub fn from_json(raw: &str) -> Result<Self, MalformedPlan> {
        if raw.trim().is_empty() {
            return Err(MalformedPlan::Empty);
        }
        serde_json::from_str(raw).map_err(|e| match e.classify() {
            serde_json::error::Category::Data => MalformedPlan::Shape(e),
            _ => MalformedPlan::Syntax(e),
        })
    }

    /// Serialize with object keys sorted at every level, so two plans with
    /// the same content always produce the same text.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        serde_json::to_string(&canonicalize(value))
    }

    /// Hex SHA-256 of [`Self::to_canonical_json`].
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        Ok(digest_hex(&self.to_canonical_json()?))
    }

    /// Look up a widget anywhere in the tree.
    pub fn find_widget(&self, id: &str) -> Option<&Widget> {
        find_in(&self.widgets, id)
    }

    /// Mutable lookup of a widget anywhere in the tree.
    pub fn find_widget_mut(&mut self, id: &str) -> Option<&mut Widget> {
        find_in_mut(&mut self.widgets, id)
    }

    /// Every widget in depth-first declaration order, with its path
    /// (`widgets[2].children[0]`).
    pub fn walk(&self) -> Vec<(String, &Widget)> {
        let mut out = Vec::new();
        walk_into(&self.widgets, "widgets", &mut out);
        out
    }
}

/// Hex SHA-256 of a string.
pub fn digest_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

fn find_in<'a>(widgets: &'a [Widget], id: &str) -> Option<&'a Widget> {
    for widget in widgets {
        if widget.id == id {
            return Some(widget);
        }
        if let Some(found) = find_in(widget.children(), id) {
            return Some(found);
        }
    }
    None
}

fn find_in_mut<'a>(widgets: &'a mut [Widget], id: &str) -> Option<&'a mut Widget> {
    for widget in widgets.iter_mut() {
        if widget.id == id {
            return Some(widget);
        }
        if let WidgetKind::Panel { children } = &mut widget.kind {
            if let Some(found) = find_in_mut(children, id) {
                return Some(found);
            }
        }
    }
    None
}

fn walk_into<'a>(widgets: &'a [Widget], prefix: &str, out: &mut Vec<(String, &'a Widget)>) {
    for (idx, widget) in widgets.iter().enumerate() {
        let path = format!("{prefix}[{idx}]");
        out.push((path.clone(), widget));
        walk_into(widget.children(), &format!("{path}.children"), out);
    }
}
