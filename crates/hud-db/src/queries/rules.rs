//! Database query functions for the `rules` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqliteExecutor};

use crate::models::RuleRow;

/// List the rules of a profile in evaluation order.
pub async fn list_rules<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
) -> Result<Vec<RuleRow>> {
    let rows = sqlx::query_as::<_, RuleRow>(
        "SELECT * FROM rules WHERE profile_id = ?1 ORDER BY position ASC, rule_id ASC",
    )
    .bind(profile_id)
    .fetch_all(executor)
    .await
    .with_context(|| format!("failed to list rules for profile {profile_id}"))?;

    Ok(rows)
}

/// Insert a rule at the end of the evaluation order, or replace the
/// definition of an existing rule in place.
///
/// Replacing a definition resets its sampling state.
pub async fn upsert_rule(
    conn: &mut SqliteConnection,
    profile_id: &str,
    rule_id: &str,
    definition: &str,
) -> Result<()> {
    let (next_position,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM rules WHERE profile_id = ?1",
    )
    .bind(profile_id)
    .fetch_one(&mut *conn)
    .await
    .context("failed to compute next rule position")?;

    sqlx::query(
        "INSERT INTO rules (profile_id, rule_id, position, definition, last_value, last_at) \
         VALUES (?1, ?2, ?3, ?4, NULL, NULL) \
         ON CONFLICT (profile_id, rule_id) DO UPDATE SET \
             definition = excluded.definition, \
             last_value = NULL, \
             last_at = NULL",
    )
    .bind(profile_id)
    .bind(rule_id)
    .bind(next_position)
    .bind(definition)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to save rule {rule_id:?}"))?;

    Ok(())
}

/// Replace the definition of an existing rule, keeping its sampling state.
///
/// Returns `false` when the rule does not exist.
pub async fn update_definition<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    rule_id: &str,
    definition: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE rules SET definition = ?3 WHERE profile_id = ?1 AND rule_id = ?2",
    )
    .bind(profile_id)
    .bind(rule_id)
    .bind(definition)
    .execute(executor)
    .await
    .with_context(|| format!("failed to update rule {rule_id:?}"))?;

    Ok(result.rows_affected() > 0)
}

/// Delete a rule. Returns `false` when the rule does not exist.
pub async fn delete_rule<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    rule_id: &str,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM rules WHERE profile_id = ?1 AND rule_id = ?2")
        .bind(profile_id)
        .bind(rule_id)
        .execute(executor)
        .await
        .with_context(|| format!("failed to delete rule {rule_id:?}"))?;

    Ok(result.rows_affected() > 0)
}

/// Store the latest sample observed by a rule.
pub async fn update_sampling<'e>(
    executor: impl SqliteExecutor<'e>,
    profile_id: &str,
    rule_id: &str,
    last_value: f64,
    last_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE rules SET last_value = ?3, last_at = ?4 WHERE profile_id = ?1 AND rule_id = ?2",
    )
    .bind(profile_id)
    .bind(rule_id)
    .bind(last_value)
    .bind(last_at)
    .execute(executor)
    .await
    .with_context(|| format!("failed to update sampling state of rule {rule_id:?}"))?;

    Ok(())
}
