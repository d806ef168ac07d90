//! End-to-end tests that run the `hud` binary against a temporary database.
//!
//! Each test gets its own data directory and config home so no user
//! configuration leaks in.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("hud_cli_")
            .tempdir()
            .expect("failed to create temp directory");
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn db_url(&self) -> String {
        format!("sqlite://{}", self.path().join("data").join("hud.db").display())
    }

    fn write(&self, name: &str, contents: &str) -> String {
        let path = self.path().join(name);
        std::fs::write(&path, contents).expect("failed to write fixture");
        path.display().to_string()
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_hud"))
            .args(args)
            .arg("--database-url")
            .arg(self.db_url())
            .arg("--profile")
            .arg("main")
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env_remove("HUD_DATABASE_URL")
            .env_remove("HUD_PROFILE")
            .env("RUST_LOG", "warn")
            .output()
            .expect("failed to run hud")
    }

    /// Run and require success, returning stdout.
    fn ok(&self, args: &[&str]) -> String {
        let out = self.run(args);
        assert!(
            out.status.success(),
            "hud {args:?} failed\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).into_owned()
    }
}

const PLAN: &str = r#"{
  "version": "1.0",
  "profileId": "main",
  "widgets": [
    {"id": "status", "type": "text", "text": "idle"},
    {"id": "bosses", "type": "counter", "value": 0}
  ]
}"#;

const BOSS_RULE: &str = r#"{
  "id": "boss",
  "mode": "includes",
  "pattern": "boss defeated",
  "action": {"type": "incrementCounter", "widgetId": "bosses"}
}"#;

#[test]
fn db_init_creates_default_plan() {
    let env = Env::new();
    let out = env.ok(&["db-init"]);
    assert!(out.contains("memory_entries: 1 rows"), "unexpected output: {out}");
    assert!(out.contains("plan_slots: 2 rows"), "unexpected output: {out}");

    let again = env.ok(&["db-init"]);
    assert!(again.contains("already has a plan"), "unexpected output: {again}");

    let shown = env.ok(&["plan", "show", "--json"]);
    let plan: serde_json::Value = serde_json::from_str(&shown).expect("plan show --json is JSON");
    assert_eq!(plan["profileId"], "main");

    let profiles = env.ok(&["profiles"]);
    assert!(profiles.contains("* main"), "unexpected output: {profiles}");
}

#[test]
fn apply_rules_and_undo() {
    let env = Env::new();
    env.ok(&["db-init"]);

    let plan = env.write("plan.json", PLAN);
    let out = env.ok(&["plan", "apply", &plan, "--reason", "layout"]);
    assert!(out.contains("Applied: snapshot"), "unexpected output: {out}");

    let rule = env.write("rule.json", BOSS_RULE);
    env.ok(&["rule", "add", &rule]);
    let listed = env.ok(&["rule", "list"]);
    assert!(listed.contains("add 1 to bosses"), "unexpected output: {listed}");

    let fired = env.ok(&["event", "BOSS DEFEATED"]);
    assert!(fired.contains("Fired boss"), "unexpected output: {fired}");
    let quiet = env.ok(&["event", "nothing here"]);
    assert!(quiet.contains("No rule fired"), "unexpected output: {quiet}");

    let shown = env.ok(&["plan", "show", "--json"]);
    assert!(shown.contains("\"value\": 1"), "unexpected plan: {shown}");

    let history = env.ok(&["history"]);
    assert!(history.contains("rules: boss"), "unexpected output: {history}");
    assert!(history.contains("layout"), "unexpected output: {history}");

    env.ok(&["undo"]);
    let shown = env.ok(&["plan", "show", "--json"]);
    assert!(shown.contains("\"value\": 0"), "unexpected plan: {shown}");
    env.ok(&["redo"]);

    let log = env.ok(&["log", "--limit", "50"]);
    assert!(log.contains("rule_event"), "unexpected log: {log}");
}

#[test]
fn invalid_plan_is_rejected_and_reported() {
    let env = Env::new();
    env.ok(&["db-init"]);

    let bad = env.write(
        "bad.json",
        r#"{"version": "1.0", "profileId": "main", "widgets": [
            {"id": "a", "type": "text", "text": "x"},
            {"id": "a", "type": "text", "text": "y"}
        ]}"#,
    );

    let out = env.run(&["plan", "validate", &bad]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("duplicate widget id"), "unexpected stderr: {stderr}");

    let out = env.run(&["plan", "apply", &bad]);
    assert!(!out.status.success());

    let history = env.ok(&["history"]);
    assert_eq!(history.matches("initialize profile").count(), 1);
}

#[test]
fn malformed_draft_is_logged_not_applied() {
    let env = Env::new();
    env.ok(&["db-init"]);

    let draft = env.write("draft.txt", "sure! here is your plan: {");
    let out = env.ok(&["plan", "draft", &draft]);
    assert!(out.contains("Draft rejected"), "unexpected output: {out}");

    let log = env.ok(&["log"]);
    assert!(log.contains("composer_warning"), "unexpected log: {log}");
}

#[test]
fn undo_without_history_fails() {
    let env = Env::new();
    env.ok(&["db-init"]);

    let out = env.run(&["undo"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("nothing to undo"), "unexpected stderr: {stderr}");
}

#[test]
fn notes_show_up_in_the_log() {
    let env = Env::new();
    env.ok(&["db-init"]);
    env.ok(&["note", "started the run"]);

    let log = env.ok(&["log"]);
    assert!(log.contains("started the run"), "unexpected log: {log}");
    assert!(log.contains("note"), "unexpected log: {log}");
}
