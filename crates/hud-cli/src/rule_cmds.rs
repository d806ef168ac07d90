//! CLI handlers for `hud rule` subcommands.

use anyhow::{Context, Result};

use hud_core::gateway::PlanGateway;
use hud_core::rules::{Rule, RuleAction};

use crate::RuleCommands;
use crate::plan_cmds::read_source;

/// Dispatch a `RuleCommands` variant to the appropriate handler.
pub async fn run_rule_command(
    command: RuleCommands,
    gateway: &PlanGateway,
    profile_id: &str,
) -> Result<()> {
    match command {
        RuleCommands::Add { file } => cmd_add(gateway, profile_id, &file).await,
        RuleCommands::List { verbose } => cmd_list(gateway, profile_id, verbose).await,
        RuleCommands::Remove { rule_id } => {
            gateway.remove_rule(profile_id, &rule_id).await?;
            println!("Rule {rule_id} removed.");
            Ok(())
        }
        RuleCommands::Enable { rule_id } => {
            gateway.set_rule_enabled(profile_id, &rule_id, true).await?;
            println!("Rule {rule_id} enabled.");
            Ok(())
        }
        RuleCommands::Disable { rule_id } => {
            gateway.set_rule_enabled(profile_id, &rule_id, false).await?;
            println!("Rule {rule_id} disabled.");
            Ok(())
        }
    }
}

/// Add or replace a rule from a JSON definition.
async fn cmd_add(gateway: &PlanGateway, profile_id: &str, file: &str) -> Result<()> {
    let raw = read_source(file)?;
    let rule = Rule::from_json(&raw).with_context(|| format!("{file} is not a valid rule"))?;
    let id = rule.id.clone();

    let plan = gateway.current_plan(profile_id).await?;
    if let Some(plan) = plan {
        let target = rule.action.widget_id();
        if plan.find_widget(target).is_none() {
            println!("Warning: widget {target:?} is not in the current plan; the rule will skip until it is.");
        }
    }

    gateway.add_rule(profile_id, rule).await?;
    println!("Rule {id} saved.");
    Ok(())
}

async fn cmd_list(gateway: &PlanGateway, profile_id: &str, verbose: bool) -> Result<()> {
    let rules = gateway.list_rules(profile_id).await?;
    if rules.is_empty() {
        println!("No rules for profile {profile_id}. Use `hud rule add <file>` to add one.");
        return Ok(());
    }

    for stored in &rules {
        let rule = &stored.rule;
        let state = if rule.enabled { "on " } else { "off" };
        println!(
            "[{state}] {:<20} {:<8} {:?} -> {}",
            rule.id,
            rule.mode,
            rule.pattern,
            describe_action(&rule.action)
        );
        if verbose {
            if let Some(sampling) = &stored.sampling {
                println!(
                    "        last sample {} at {}",
                    sampling.last_value,
                    sampling.last_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
    }

    Ok(())
}

fn describe_action(action: &RuleAction) -> String {
    match action {
        RuleAction::SetTextWidget {
            widget_id,
            template,
        } => format!("set {widget_id} to {template:?}"),
        RuleAction::IncrementCounter { widget_id, amount } => {
            format!("add {amount} to {widget_id}")
        }
        RuleAction::TrackRate {
            widget_id,
            value_source,
            unit,
            min_seconds,
            ..
        } => format!("rate of {value_source} ({unit}/h, >= {min_seconds}s) into {widget_id}"),
    }
}
