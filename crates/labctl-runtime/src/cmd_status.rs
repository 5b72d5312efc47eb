//! One-shot commands: `status`, `terminate`, `view`.

use std::io::Write as _;

use anyhow::Context as _;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};

use labctl_core::progress::estimate;
use labctl_core::wire::TerminateRequest;
use labctl_runtime::config::LabConfig;
use labctl_runtime::context::{build_api, build_store};
use labctl_runtime::render::format_clock;

pub async fn cmd_status(config: &LabConfig, session_id: &str, json: bool) -> anyhow::Result<()> {
    config.validate()?;
    let api = build_api(config)?;
    let snap = api
        .get_session(session_id)
        .await
        .with_context(|| format!("failed to fetch session {session_id}"))?;
    let progress = estimate(&snap, 1);
    let url = snap.connection_url();

    if json {
        let value = serde_json::json!({
            "session_id": snap.session_id.as_deref().unwrap_or(session_id),
            "status": snap.status,
            "progress": progress.progress_percent,
            "stage_message": progress.stage_message,
            "connection_url": url,
            "expires_at": snap.expires_at,
            "error": snap.error,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("session: {session_id}");
    println!("status: {}", snap.status);
    if snap.status.is_provisioning() {
        match progress.time_estimate {
            Some(est) => println!(
                "progress: {}% {} ({est} remaining)",
                progress.progress_percent, progress.stage_message
            ),
            None => println!(
                "progress: {}% {}",
                progress.progress_percent, progress.stage_message
            ),
        }
    }
    if let Some(url) = url {
        println!("url: {url}");
    }
    if let Some(expires) = snap.expires_at {
        let left = (expires - Utc::now()).num_seconds().max(0) as u64;
        println!("expires: {} ({} left)", expires.to_rfc3339(), format_clock(left));
    }
    if let Some(err) = &snap.error {
        println!("error: {err}");
    }
    Ok(())
}

/// Returns the process exit code; 1 when the user declines.
pub async fn cmd_terminate(config: &LabConfig, session_id: &str, yes: bool) -> anyhow::Result<i32> {
    config.validate()?;
    if !yes && !confirm(&format!("End session {session_id}? [y/N] ")).await? {
        eprintln!("aborted");
        return Ok(1);
    }
    let api = build_api(config)?;
    api.terminate(session_id, &TerminateRequest::user_requested())
        .await
        .with_context(|| format!("failed to end session {session_id}"))?;

    // Forget the split view if it belonged to this session.
    let store = build_store(config);
    if store
        .load(Utc::now())
        .is_some_and(|view| view.session_id == session_id)
    {
        store.clear();
    }
    println!("session {session_id} ended");
    Ok(0)
}

pub fn cmd_view(config: &LabConfig, json: bool) -> anyhow::Result<()> {
    let store = build_store(config);
    match store.load(Utc::now()) {
        Some(view) if json => println!("{}", serde_json::to_string_pretty(&view)?),
        Some(view) => {
            println!("session: {}", view.session_id);
            println!("url: {}", view.connection_url);
            if let Some(expires) = view.expires_at {
                println!("expires: {}", expires.to_rfc3339());
            }
        }
        None if json => println!("null"),
        None => println!("no saved split view"),
    }
    Ok(())
}

async fn confirm(prompt: &str) -> anyhow::Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
