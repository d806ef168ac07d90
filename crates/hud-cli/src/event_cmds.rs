//! `hud event` and `hud watch`: feed passive text events to the rules.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

use hud_core::gateway::{GatewayError, IngestOutcome, PlanGateway};
use hud_core::rules::PassiveEvent;

/// Ingest a single event.
pub async fn run_event(
    gateway: &PlanGateway,
    profile_id: &str,
    event_type: &str,
    text: &str,
) -> Result<()> {
    let event = PassiveEvent::new(event_type, text, Utc::now());
    let outcome = gateway.ingest_event(profile_id, event).await?;
    report(&outcome);
    Ok(())
}

/// Stream events from standard input, one per line, until EOF or Ctrl-C.
pub async fn run_watch(gateway: &PlanGateway, profile_id: &str, event_type: &str) -> Result<()> {
    // Confirm the profile has a plan before reading any input.
    gateway.require_plan(profile_id).await?;

    // First signal stops after the current line; second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nStopping watch (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    eprintln!("Watching standard input for {event_type} events on profile {profile_id}.");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());
    let mut seen = 0usize;
    let mut fired = 0usize;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next() => match next {
                Some(line) => line.context("failed to read standard input")?,
                None => break,
            },
        };

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        seen += 1;

        let event = PassiveEvent::new(event_type, text, Utc::now());
        match gateway.ingest_event(profile_id, event).await {
            Ok(outcome) => {
                if !outcome.fired.is_empty() {
                    fired += 1;
                    report(&outcome);
                }
            }
            // A rejected rule result should not end the stream.
            Err(e @ GatewayError::Validation(_)) => {
                tracing::warn!(profile_id, error = %e, "rule result rejected");
                eprintln!("rules produced an invalid plan: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }

    eprintln!("Processed {seen} events, {fired} changed the plan.");
    Ok(())
}

fn report(outcome: &IngestOutcome) {
    if outcome.fired.is_empty() {
        println!("No rule fired.");
        return;
    }
    let snapshot = outcome
        .applied
        .as_ref()
        .and_then(|a| a.snapshot_id)
        .map_or_else(|| "no change".to_string(), |id| format!("snapshot {id}"));
    println!("Fired {} ({snapshot})", outcome.fired.join(", "));
}
