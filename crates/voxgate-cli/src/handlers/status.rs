//! `voxgate status`.

use std::fmt::Write;

use voxgate_client::DaemonClient;
use voxgate_client::config::DEFAULT_CONNECT_TIMEOUT;
use voxgate_core::{ItemSummary, StatusSnapshot};

use crate::context::CliContext;
use crate::error::CliError;

/// Query a running daemon. Never auto-starts one.
pub async fn execute(ctx: &CliContext, json: bool) -> Result<(), CliError> {
    let mut client = DaemonClient::connect(&ctx.paths.socket, DEFAULT_CONNECT_TIMEOUT).await?;
    let (pid, version) = client.ping().await?;
    let snapshot = client.status().await?;

    if json {
        let body = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CliError::General(e.to_string()))?;
        println!("{body}");
    } else {
        print!("{}", render_status(pid, &version, &snapshot));
    }
    Ok(())
}

pub fn render_status(pid: u32, version: &str, snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "daemon pid {pid}, version {version}");

    match &snapshot.active {
        Some(item) => {
            let _ = writeln!(out, "speaking: {}", summary_line(item));
        }
        None => out.push_str("speaking: nothing\n"),
    }

    if snapshot.pending.is_empty() {
        out.push_str("queue: empty\n");
    } else {
        let _ = writeln!(out, "queue ({}):", snapshot.pending.len());
        for item in &snapshot.pending {
            let _ = writeln!(out, "  {:>2}. {}", item.position, summary_line(item));
        }
    }

    let _ = writeln!(
        out,
        "completed {}, failed {}, abandoned {}, reclaimed {}",
        snapshot.completed, snapshot.failed, snapshot.abandoned, snapshot.reclaimed
    );
    out
}

fn summary_line(item: &ItemSummary) -> String {
    let origin = item.agent_id.as_ref().map_or_else(
        || item.session_id.clone(),
        |agent| format!("{}/{agent}", item.session_id),
    );
    format!(
        "{} {:<6} {origin} ({} chars)",
        item.id,
        item.priority.to_string(),
        item.text_length
    )
}
