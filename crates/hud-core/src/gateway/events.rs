//! Passive event ingestion and rule management.

use anyhow::Context;

use hud_db::models::RuleRow;
use hud_db::queries::{memory as memory_db, rules as rules_db};

use crate::memory::{Actor, MemoryPayload, RuleEventPayload, new_entry_row};
use crate::rules::{PassiveEvent, Rule, RuleStates, SamplingState, evaluate_with};

use super::{ApplyMeta, ApplyOutcome, GatewayError, PlanGateway, save_history};

/// What happened when an event was ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// Rules that changed the plan, in evaluation order.
    pub fired: Vec<String>,
    /// The resulting commit, if any rule fired.
    pub applied: Option<ApplyOutcome>,
}

/// A rule as stored for a profile, with its sampling state.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRule {
    pub rule: Rule,
    pub sampling: Option<SamplingState>,
}

impl StoredRule {
    fn from_row(row: &RuleRow) -> Option<Self> {
        let rule = match Rule::from_json(&row.definition) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::warn!(
                    profile_id = %row.profile_id,
                    rule_id = %row.rule_id,
                    error = %e,
                    "ignoring unreadable rule definition"
                );
                return None;
            }
        };
        let sampling = match (row.last_value, row.last_at) {
            (Some(last_value), Some(last_at)) => Some(SamplingState {
                last_value,
                last_at,
            }),
            _ => None,
        };
        Some(Self { rule, sampling })
    }
}

impl PlanGateway {
    /// Run the profile's rules against one event and commit the result.
    ///
    /// Sampling state and the `rule_event` entry are written first, in their
    /// own transaction, so they survive even if the resulting plan is
    /// rejected. All plan changes from one event land as a single apply with
    /// the rules as actor.
    pub async fn ingest_event(
        &self,
        profile_id: &str,
        event: PassiveEvent,
    ) -> Result<IngestOutcome, GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;

        let plan = self.require_plan(profile_id).await?;
        let stored = self.load_rules(profile_id).await?;
        let rules: Vec<Rule> = stored.iter().map(|s| s.rule.clone()).collect();
        let states: RuleStates = stored
            .iter()
            .filter_map(|s| s.sampling.map(|state| (s.rule.id.clone(), state)))
            .collect();

        let outcome = evaluate_with(&self.patterns, &plan, &rules, &states, &event);
        tracing::debug!(
            profile_id,
            event_type = %event.event_type,
            fired = outcome.fired.len(),
            sampled = outcome.sampled.len(),
            "evaluated rules"
        );

        if !outcome.fired.is_empty() || !outcome.sampled.is_empty() {
            let mut tx = self.begin_write("event").await?;

            for rule_id in &outcome.sampled {
                if let Some(state) = outcome.states.get(rule_id) {
                    rules_db::update_sampling(
                        &mut *tx,
                        profile_id,
                        rule_id,
                        state.last_value,
                        state.last_at,
                    )
                    .await?;
                }
            }

            let payload = MemoryPayload::RuleEvent(RuleEventPayload {
                event_type: event.event_type.clone(),
                text: event.text.clone(),
                rule_ids: outcome.fired.clone(),
            });
            let row = new_entry_row(
                profile_id,
                &Actor::Rules.to_string(),
                payload,
                self.retention.max_payload_bytes,
            )?;
            memory_db::insert_entry(&mut *tx, &row).await?;

            let mut history = self.load_history(&mut tx, profile_id).await?;
            if self.enforce_retention(&mut tx, profile_id, &mut history).await? {
                save_history(&mut tx, profile_id, &history).await?;
            }
            tx.commit().await.context("failed to commit event")?;
        }

        if outcome.fired.is_empty() {
            return Ok(IngestOutcome {
                fired: Vec::new(),
                applied: None,
            });
        }

        let meta = ApplyMeta::new(Actor::Rules, format!("rules: {}", outcome.fired.join(", ")));
        let applied = self
            .apply_queued(profile_id, outcome.candidate, &meta)
            .await?;

        Ok(IngestOutcome {
            fired: outcome.fired,
            applied: Some(applied),
        })
    }

    /// Add a rule at the end of the evaluation order, or replace the rule
    /// with the same id. Replacing resets its sampling state.
    pub async fn add_rule(&self, profile_id: &str, rule: Rule) -> Result<(), GatewayError> {
        rule.validate()?;
        let definition = serde_json::to_string(&rule)?;

        let _turn = self.queues.acquire(profile_id).await;
        let mut tx = self.begin_write("rule").await?;
        rules_db::upsert_rule(&mut tx, profile_id, &rule.id, &definition).await?;
        tx.commit().await.context("failed to commit rule")?;

        tracing::info!(profile_id, rule_id = %rule.id, mode = %rule.mode, "rule saved");
        Ok(())
    }

    pub async fn remove_rule(&self, profile_id: &str, rule_id: &str) -> Result<(), GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        if !rules_db::delete_rule(&self.pool, profile_id, rule_id).await? {
            return Err(GatewayError::RuleNotFound(rule_id.to_string()));
        }
        tracing::info!(profile_id, rule_id, "rule removed");
        Ok(())
    }

    /// Turn a rule on or off without touching its sampling state.
    pub async fn set_rule_enabled(
        &self,
        profile_id: &str,
        rule_id: &str,
        enabled: bool,
    ) -> Result<(), GatewayError> {
        let _turn = self.queues.acquire(profile_id).await;
        let mut stored = self
            .load_rules(profile_id)
            .await?
            .into_iter()
            .find(|s| s.rule.id == rule_id)
            .ok_or_else(|| GatewayError::RuleNotFound(rule_id.to_string()))?;

        stored.rule.enabled = enabled;
        let definition = serde_json::to_string(&stored.rule)?;
        if !rules_db::update_definition(&self.pool, profile_id, rule_id, &definition).await? {
            return Err(GatewayError::RuleNotFound(rule_id.to_string()));
        }
        tracing::info!(profile_id, rule_id, enabled, "rule toggled");
        Ok(())
    }

    /// The profile's rules in evaluation order. Unreadable definitions are
    /// skipped.
    pub async fn list_rules(&self, profile_id: &str) -> Result<Vec<StoredRule>, GatewayError> {
        self.load_rules(profile_id).await
    }

    async fn load_rules(&self, profile_id: &str) -> Result<Vec<StoredRule>, GatewayError> {
        let rows = rules_db::list_rules(&self.pool, profile_id).await?;
        Ok(rows.iter().filter_map(StoredRule::from_row).collect())
    }
}
