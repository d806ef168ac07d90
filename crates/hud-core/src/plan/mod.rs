//! Plan documents: the widget tree, its validation, and legacy import.

pub mod legacy;
pub mod model;
pub mod validate;

pub use legacy::migrate_legacy_profile;
pub use model::{
    Calculation, ChecklistItem, Layout, MalformedPlan, PLAN_VERSION, Plan, RequiredField, Widget,
    WidgetKind, digest_hex,
};
pub use validate::{ValidationReport, Violation, validate_plan};
