//! `voxgate paths`.

use std::fmt::Write;

use voxgate_core::paths::ResolvedPaths;

use crate::context::CliContext;

pub fn execute(ctx: &CliContext) {
    print!("{}", render_paths(&ctx.paths));
}

/// `key = value` lines, one per location.
pub fn render_paths(paths: &ResolvedPaths) -> String {
    let mut out = String::new();
    for (key, value) in [
        ("data_root", &paths.data_root),
        ("socket", &paths.socket),
        ("locks_dir", &paths.locks_dir),
        ("event_log", &paths.event_log),
        ("daemon_log", &paths.daemon_log),
    ] {
        let _ = writeln!(out, "{key} = {}", value.display());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_location() {
        let paths = ResolvedPaths::from_lookup(|key| match key {
            "VOXGATE_DATA_DIR" => Some("/srv/vg".into()),
            "VOXGATE_SOCKET" => Some("/run/vg.sock".into()),
            _ => None,
        })
        .unwrap();

        let out = render_paths(&paths);
        assert!(out.contains("socket = /run/vg.sock\n"));
        assert!(out.contains("locks_dir = /srv/vg/locks\n"));
        assert!(out.contains("daemon_log = /srv/vg/daemon.log\n"));
        assert_eq!(out.lines().count(), 5);
    }
}
