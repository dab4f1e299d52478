//! `voxgate backends`.

use std::fmt::Write;

use voxgate_voice::backend::{recognizers_from_settings, synthesizers_from_settings};
use voxgate_voice::{BackendStatus, CostTier};

use crate::context::CliContext;

pub async fn execute(ctx: &CliContext) {
    let synthesizers = synthesizers_from_settings(&ctx.settings).availability().await;
    let recognizers = recognizers_from_settings(&ctx.settings).availability().await;
    print!("{}", render_backends(&synthesizers, &recognizers));
}

/// Both chains in priority order.
pub fn render_backends(synthesizers: &[BackendStatus], recognizers: &[BackendStatus]) -> String {
    let mut out = String::new();
    render_section(&mut out, "Synthesizers", synthesizers);
    out.push('\n');
    render_section(&mut out, "Recognizers", recognizers);
    out
}

fn render_section(out: &mut String, title: &str, statuses: &[BackendStatus]) {
    let _ = writeln!(out, "{title}:");
    if statuses.is_empty() {
        out.push_str("  (none configured)\n");
        return;
    }
    let _ = writeln!(out, "  {:<14} {:<10} {:<8} {:<8} MAX CHARS", "NAME", "STATUS", "WHERE", "COST");
    for status in statuses {
        let caps = &status.capabilities;
        let _ = writeln!(
            out,
            "  {:<14} {:<10} {:<8} {:<8} {}",
            status.name,
            if status.available { "available" } else { "missing" },
            if caps.local { "local" } else { "network" },
            match caps.cost {
                CostTier::Free => "free",
                CostTier::Metered => "metered",
            },
            caps.max_input_chars
                .map_or_else(|| "-".to_string(), |max| max.to_string()),
        );
    }
}
