//! Integration tests for the apply gateway: commits, undo/redo, rollback,
//! retention, and crash recovery against a real SQLite database.

use uuid::Uuid;

use hud_core::gateway::{ApplyMeta, DraftOutcome, GatewayError, PlanGateway};
use hud_core::memory::{Actor, MemoryPayload};
use hud_core::plan::{Plan, Widget, WidgetKind};
use hud_db::models::{EntryType, PlanSlotKind};
use hud_db::queries::{memory as memory_db, plans as plans_db};
use hud_test_utils::create_test_db;

const PROFILE: &str = "main";

fn plan_with_events(value: i64) -> Plan {
    let mut plan = Plan::default_for(PROFILE);
    if let Some(widget) = plan.find_widget_mut("events") {
        widget.kind = WidgetKind::Counter { value, step: 1 };
    }
    plan
}

fn user(reason: &str) -> ApplyMeta {
    ApplyMeta::new(Actor::User, reason)
}

fn events_value(plan: &Plan) -> i64 {
    match plan.find_widget("events").map(|w| &w.kind) {
        Some(WidgetKind::Counter { value, .. }) => *value,
        other => panic!("unexpected events widget: {other:?}"),
    }
}

async fn init(gateway: &PlanGateway) -> Uuid {
    gateway
        .initialize_profile(PROFILE)
        .await
        .expect("init should succeed")
        .and_then(|o| o.snapshot_id)
        .expect("first init creates a snapshot")
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());

    assert!(gateway.current_plan(PROFILE).await.unwrap().is_none());
    init(&gateway).await;
    assert!(gateway.initialize_profile(PROFILE).await.unwrap().is_none());

    let plan = gateway.require_plan(PROFILE).await.unwrap();
    assert_eq!(plan, Plan::default_for(PROFILE));
    assert_eq!(gateway.profiles().await.unwrap(), vec![PROFILE.to_string()]);
    assert_eq!(gateway.list_snapshots(PROFILE).await.unwrap().len(), 1);

    db.close().await;
}

#[tokio::test]
async fn undo_restores_prior_plan_and_redo_reapplies() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    let s0 = init(&gateway).await;

    let applied = gateway
        .apply(PROFILE, plan_with_events(5), user("bump"))
        .await
        .unwrap();
    let s1 = applied.snapshot_id.unwrap();

    let undone = gateway.undo(PROFILE).await.unwrap();
    assert_eq!(undone.snapshot_id, Some(s0));
    assert_eq!(events_value(&undone.plan), 0);
    assert_eq!(events_value(&gateway.require_plan(PROFILE).await.unwrap()), 0);

    let redone = gateway.redo(PROFILE).await.unwrap();
    assert_eq!(redone.snapshot_id, Some(s1));
    assert_eq!(redone.plan, plan_with_events(5));
    assert_eq!(gateway.require_plan(PROFILE).await.unwrap(), plan_with_events(5));

    let err = gateway.redo(PROFILE).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoRedoAvailable));
    assert!(err.is_not_found());

    db.close().await;
}

#[tokio::test]
async fn undo_without_history_fails() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());

    assert!(matches!(
        gateway.undo(PROFILE).await,
        Err(GatewayError::NoUndoAvailable)
    ));
    init(&gateway).await;
    assert!(matches!(
        gateway.undo(PROFILE).await,
        Err(GatewayError::NoUndoAvailable)
    ));

    db.close().await;
}

#[tokio::test]
async fn apply_after_undo_clears_redo() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    init(&gateway).await;

    gateway
        .apply(PROFILE, plan_with_events(1), user("one"))
        .await
        .unwrap();
    gateway.undo(PROFILE).await.unwrap();
    gateway
        .apply(PROFILE, plan_with_events(2), user("two"))
        .await
        .unwrap();

    assert!(matches!(
        gateway.redo(PROFILE).await,
        Err(GatewayError::NoRedoAvailable)
    ));
    assert!(gateway.history(PROFILE).await.unwrap().redo.is_empty());

    db.close().await;
}

#[tokio::test]
async fn unchanged_plan_creates_no_snapshot() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    init(&gateway).await;

    let outcome = gateway
        .apply(PROFILE, Plan::default_for(PROFILE), user("same"))
        .await
        .unwrap();
    assert_eq!(outcome.snapshot_id, None);
    assert_eq!(gateway.list_snapshots(PROFILE).await.unwrap().len(), 1);

    db.close().await;
}

#[tokio::test]
async fn invalid_plan_changes_nothing() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    init(&gateway).await;
    let history_before = gateway.history(PROFILE).await.unwrap();
    let entries_before = memory_db::count_entries(&db.pool, PROFILE, None).await.unwrap();

    let mut bad = Plan::default_for(PROFILE);
    bad.widgets.push(Widget::text("status", "duplicate"));
    bad.widgets.push(Widget::text("", "no id"));

    let err = gateway.apply(PROFILE, bad, user("bad")).await.unwrap_err();
    let GatewayError::Validation(report) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert_eq!(report.violations.len(), 2);

    assert_eq!(gateway.require_plan(PROFILE).await.unwrap(), Plan::default_for(PROFILE));
    assert_eq!(gateway.history(PROFILE).await.unwrap(), history_before);
    assert_eq!(
        memory_db::count_entries(&db.pool, PROFILE, None).await.unwrap(),
        entries_before
    );

    db.close().await;
}

#[tokio::test]
async fn plan_for_another_profile_is_rejected() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());

    let err = gateway
        .apply(PROFILE, Plan::default_for("someone-else"), user("wrong"))
        .await
        .unwrap_err();
    match err {
        GatewayError::Validation(report) => assert!(report.has_path("profileId")),
        other => panic!("expected a validation error, got {other:?}"),
    }

    db.close().await;
}

#[tokio::test]
async fn rollback_rebuilds_undo_from_ancestry() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    let s0 = init(&gateway).await;

    let s1 = gateway
        .apply(PROFILE, plan_with_events(1), user("one"))
        .await
        .unwrap()
        .snapshot_id
        .unwrap();
    gateway
        .apply(PROFILE, plan_with_events(2), user("two"))
        .await
        .unwrap();
    gateway
        .apply(PROFILE, plan_with_events(3), user("three"))
        .await
        .unwrap();
    gateway.undo(PROFILE).await.unwrap();

    let rolled = gateway.rollback(PROFILE, s1).await.unwrap();
    assert_eq!(rolled.plan, plan_with_events(1));
    let history = gateway.history(PROFILE).await.unwrap();
    assert_eq!(history.current_snapshot_id, Some(s1));
    assert_eq!(history.undo, vec![s0]);
    assert!(history.redo.is_empty());

    let s4 = gateway
        .apply(PROFILE, plan_with_events(4), user("four"))
        .await
        .unwrap()
        .snapshot_id
        .unwrap();
    let snapshots = gateway.list_snapshots(PROFILE).await.unwrap();
    let newest = snapshots.last().unwrap();
    assert_eq!(newest.snapshot_id, s4);
    assert_eq!(newest.base_snapshot_id, Some(s1));
    assert!(newest.is_current);
    assert_eq!(gateway.history(PROFILE).await.unwrap().undo, vec![s0, s1]);

    db.close().await;
}

#[tokio::test]
async fn rollback_to_unknown_snapshot_fails() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    init(&gateway).await;

    let missing = Uuid::new_v4();
    let err = gateway.rollback(PROFILE, missing).await.unwrap_err();
    assert!(matches!(err, GatewayError::SnapshotNotFound(id) if id == missing));

    db.close().await;
}

#[tokio::test]
async fn corrupt_snapshot_blocks_undo_without_moving_cursor() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    let s0 = init(&gateway).await;
    gateway
        .apply(PROFILE, plan_with_events(7), user("seven"))
        .await
        .unwrap();
    let before = gateway.history(PROFILE).await.unwrap();

    sqlx::query("UPDATE memory_entries SET payload = '{\"broken\": true}' WHERE snapshot_id = ?1")
        .bind(s0)
        .execute(&db.pool)
        .await
        .unwrap();

    let err = gateway.undo(PROFILE).await.unwrap_err();
    assert!(matches!(err, GatewayError::CorruptSnapshot { snapshot_id, .. } if snapshot_id == s0));
    assert!(err.is_not_found());
    assert_eq!(gateway.history(PROFILE).await.unwrap(), before);
    assert_eq!(gateway.require_plan(PROFILE).await.unwrap(), plan_with_events(7));

    let err = gateway.rollback(PROFILE, s0).await.unwrap_err();
    assert!(matches!(err, GatewayError::SnapshotNotFound(_)));

    db.close().await;
}

#[tokio::test]
async fn snapshot_retention_keeps_newest_fifty() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    let s0 = init(&gateway).await;

    for value in 1..=50 {
        gateway
            .apply(PROFILE, plan_with_events(value), user("bump"))
            .await
            .unwrap();
    }

    let count = memory_db::count_entries(&db.pool, PROFILE, Some(EntryType::PlanSnapshot))
        .await
        .unwrap();
    assert_eq!(count, 50);

    let snapshots = gateway.list_snapshots(PROFILE).await.unwrap();
    assert!(snapshots.iter().all(|s| s.snapshot_id != s0));

    let history = gateway.history(PROFILE).await.unwrap();
    assert_eq!(history.undo.len(), 49);
    assert!(!history.undo.contains(&s0));
    assert!(matches!(
        gateway.rollback(PROFILE, s0).await,
        Err(GatewayError::SnapshotNotFound(_))
    ));

    db.close().await;
}

#[tokio::test]
async fn entry_retention_keeps_newest_five_hundred() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    init(&gateway).await;

    for n in 0..500 {
        gateway
            .record_note(PROFILE, &format!("note {n}"))
            .await
            .unwrap();
    }

    assert_eq!(
        memory_db::count_entries(&db.pool, PROFILE, None).await.unwrap(),
        500
    );
    // The initial snapshot was the oldest entry.
    assert_eq!(
        memory_db::count_entries(&db.pool, PROFILE, Some(EntryType::PlanSnapshot))
            .await
            .unwrap(),
        0
    );
    let history = gateway.history(PROFILE).await.unwrap();
    assert_eq!(history.current_snapshot_id, None);
    assert!(history.undo.is_empty());

    // The plan itself lives in the slots and survives.
    assert_eq!(gateway.require_plan(PROFILE).await.unwrap(), Plan::default_for(PROFILE));

    let newest = gateway.list_entries(PROFILE, 1).await.unwrap();
    assert!(matches!(&newest[0].payload, MemoryPayload::Note(n) if n.text == "note 499"));

    db.close().await;
}

#[tokio::test]
async fn malformed_draft_is_rejected_and_logged() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    init(&gateway).await;

    let outcome = gateway
        .apply_draft(PROFILE, "{\"widgets\": 12", ApplyMeta::new(Actor::Composer, "draft"))
        .await
        .unwrap();
    let DraftOutcome::Rejected { warning } = outcome else {
        panic!("expected rejection");
    };
    assert!(warning.contains("composer"));

    assert_eq!(gateway.require_plan(PROFILE).await.unwrap(), Plan::default_for(PROFILE));
    let entries = gateway.list_entries(PROFILE, 10).await.unwrap();
    assert_eq!(entries[0].entry_type(), EntryType::ComposerWarning);
    assert_eq!(entries[0].source, "composer");

    let good = serde_json::to_string(&plan_with_events(9)).unwrap();
    let outcome = gateway
        .apply_draft(PROFILE, &good, ApplyMeta::new(Actor::Composer, "draft"))
        .await
        .unwrap();
    assert!(matches!(outcome, DraftOutcome::Applied(ref o) if o.snapshot_id.is_some()));
    assert_eq!(events_value(&gateway.require_plan(PROFILE).await.unwrap()), 9);

    db.close().await;
}

#[tokio::test]
async fn corrupt_primary_falls_back_to_backup() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    init(&gateway).await;
    gateway
        .apply(PROFILE, plan_with_events(3), user("three"))
        .await
        .unwrap();

    plans_db::upsert_slot(&db.pool, PROFILE, PlanSlotKind::Primary, "{truncated", "x")
        .await
        .unwrap();
    assert_eq!(gateway.require_plan(PROFILE).await.unwrap(), plan_with_events(3));

    plans_db::upsert_slot(&db.pool, PROFILE, PlanSlotKind::Backup, "[]", "y")
        .await
        .unwrap();
    assert!(matches!(
        gateway.current_plan(PROFILE).await,
        Err(GatewayError::CorruptPlan(_))
    ));

    // A fresh apply heals both slots.
    gateway
        .apply(PROFILE, plan_with_events(4), user("four"))
        .await
        .unwrap();
    assert_eq!(gateway.require_plan(PROFILE).await.unwrap(), plan_with_events(4));

    db.close().await;
}

#[tokio::test]
async fn legacy_import_becomes_current_plan() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());

    let raw = r#"{"selectedMonitorId": "DISPLAY1", "widgets": [
        {"id": "clock", "type": "timer", "x": 10, "y": 10, "width": 120, "height": 40},
        {"id": "map", "type": "minimap", "x": 0, "y": 0, "width": 300, "height": 300}
    ]}"#;
    let outcome = gateway.import_legacy(PROFILE, raw).await.unwrap();
    assert!(outcome.snapshot_id.is_some());

    let plan = gateway.require_plan(PROFILE).await.unwrap();
    assert_eq!(plan.widgets.len(), 2);
    assert_eq!(plan.widgets[1].title.as_deref(), Some("minimap"));

    let snapshots = gateway.list_snapshots(PROFILE).await.unwrap();
    assert_eq!(snapshots[0].actor, Some(Actor::System));

    assert!(matches!(
        gateway.import_legacy(PROFILE, "nope").await,
        Err(GatewayError::Malformed(_))
    ));

    db.close().await;
}

#[tokio::test]
async fn profiles_have_separate_histories() {
    let db = create_test_db().await;
    let gateway = PlanGateway::new(db.pool.clone());
    init(&gateway).await;
    gateway.initialize_profile("alt").await.unwrap();

    gateway
        .apply(PROFILE, plan_with_events(1), user("one"))
        .await
        .unwrap();
    assert!(matches!(
        gateway.undo("alt").await,
        Err(GatewayError::NoUndoAvailable)
    ));
    assert_eq!(gateway.list_snapshots("alt").await.unwrap().len(), 1);
    assert_eq!(
        gateway.profiles().await.unwrap(),
        vec!["alt".to_string(), PROFILE.to_string()]
    );

    db.close().await;
}
