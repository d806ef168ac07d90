//! CLI handlers for `hud plan` subcommands.
//!
//! Implements:
//! - `hud plan show [--json]`          -- print the current plan
//! - `hud plan validate <file>`        -- check a plan file without applying it
//! - `hud plan apply <file>`           -- validate and commit a plan file
//! - `hud plan draft <file>`           -- submit an untrusted composer draft
//! - `hud plan import-legacy <file>`   -- convert a legacy profile document

use std::io::Read;

use anyhow::{Context, Result};

use hud_core::gateway::{ApplyMeta, ApplyOutcome, DraftOutcome, PlanGateway};
use hud_core::memory::Actor;
use hud_core::plan::{Plan, validate_plan};

use crate::PlanCommands;

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(
    command: PlanCommands,
    gateway: &PlanGateway,
    profile_id: &str,
) -> Result<()> {
    match command {
        PlanCommands::Show { json } => cmd_show(gateway, profile_id, json).await,
        PlanCommands::Validate { file } => cmd_validate(&file),
        PlanCommands::Apply { file, reason } => {
            cmd_apply(gateway, profile_id, &file, reason.as_deref()).await
        }
        PlanCommands::Draft { file } => cmd_draft(gateway, profile_id, &file).await,
        PlanCommands::ImportLegacy { file } => cmd_import_legacy(gateway, profile_id, &file).await,
    }
}

/// Read a file argument; `-` reads standard input.
pub fn read_source(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read standard input")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))
}

/// Print what an apply did.
pub fn print_outcome(verb: &str, outcome: &ApplyOutcome) {
    match outcome.snapshot_id {
        Some(id) => println!("{verb}: snapshot {id} ({} widgets)", outcome.plan.widgets.len()),
        None => println!("{verb}: plan unchanged, no snapshot recorded"),
    }
}

// -----------------------------------------------------------------------
// hud plan show
// -----------------------------------------------------------------------

async fn cmd_show(gateway: &PlanGateway, profile_id: &str, json: bool) -> Result<()> {
    let Some(plan) = gateway.current_plan(profile_id).await? else {
        println!("Profile {profile_id} has no plan. Run `hud db-init` to create the default one.");
        return Ok(());
    };

    if json {
        let pretty = serde_json::to_string_pretty(&plan).context("failed to render plan")?;
        println!("{pretty}");
        return Ok(());
    }

    let digest = plan.digest().context("failed to digest plan")?;
    println!("Profile: {}", plan.profile_id);
    println!("Version: {}", plan.version);
    println!("Digest:  {}", &digest[..12]);
    println!();

    let widgets = plan.walk();
    if widgets.is_empty() {
        println!("No widgets.");
        return Ok(());
    }

    let path_w = widgets.iter().map(|(p, _)| p.len()).max().unwrap_or(4).max(4);
    println!("{:<path_w$}  {:<20}  {:<10}  TITLE", "PATH", "ID", "TYPE");
    println!("{}", "-".repeat(path_w + 48));
    for (path, widget) in &widgets {
        println!(
            "{:<path_w$}  {:<20}  {:<10}  {}",
            path,
            widget.id,
            widget.kind.type_name(),
            widget.title.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

// -----------------------------------------------------------------------
// hud plan validate <file>
// -----------------------------------------------------------------------

fn cmd_validate(file: &str) -> Result<()> {
    let raw = read_source(file)?;
    let plan = Plan::from_json(&raw).with_context(|| format!("{file} is not a plan"))?;

    match validate_plan(&plan) {
        Ok(()) => {
            println!(
                "{file}: valid ({} widgets, profile {})",
                plan.walk().len(),
                plan.profile_id
            );
            Ok(())
        }
        Err(report) => Err(anyhow::Error::new(report).context(format!("{file} failed validation"))),
    }
}

// -----------------------------------------------------------------------
// hud plan apply <file>
// -----------------------------------------------------------------------

async fn cmd_apply(
    gateway: &PlanGateway,
    profile_id: &str,
    file: &str,
    reason: Option<&str>,
) -> Result<()> {
    let raw = read_source(file)?;
    let plan = Plan::from_json(&raw).with_context(|| format!("{file} is not a plan"))?;
    let reason = reason.map_or_else(|| format!("apply {file}"), str::to_string);

    let outcome = gateway
        .apply(profile_id, plan, ApplyMeta::new(Actor::User, reason))
        .await?;
    print_outcome("Applied", &outcome);
    Ok(())
}

// -----------------------------------------------------------------------
// hud plan draft <file>
// -----------------------------------------------------------------------

async fn cmd_draft(gateway: &PlanGateway, profile_id: &str, file: &str) -> Result<()> {
    let raw = read_source(file)?;
    let meta = ApplyMeta::new(Actor::Composer, format!("draft {file}"));

    match gateway.apply_draft(profile_id, &raw, meta).await? {
        DraftOutcome::Applied(outcome) => print_outcome("Draft applied", &outcome),
        DraftOutcome::Rejected { warning } => {
            println!("Draft rejected; current plan kept.");
            println!("  {warning}");
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// hud plan import-legacy <file>
// -----------------------------------------------------------------------

async fn cmd_import_legacy(gateway: &PlanGateway, profile_id: &str, file: &str) -> Result<()> {
    let raw = read_source(file)?;
    let outcome = gateway.import_legacy(profile_id, &raw).await?;
    print_outcome("Imported", &outcome);
    Ok(())
}
