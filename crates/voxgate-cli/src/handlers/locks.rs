//! `voxgate locks list|clean`.

use std::fmt::Write;

use voxgate_client::{LockEntry, LockManager};

use crate::commands::LocksCommand;
use crate::context::CliContext;
use crate::error::CliError;

pub fn execute(ctx: &CliContext, command: LocksCommand) -> Result<(), CliError> {
    let locks = LockManager::new(ctx.paths.locks_dir.clone(), ctx.settings.lock_stale_after());
    match command {
        LocksCommand::List => print!("{}", render_locks(&locks.list()?)),
        LocksCommand::Clean => {
            let removed = locks.sweep()?;
            println!("Removed {removed} stale lock(s) from {}", locks.dir().display());
        }
    }
    Ok(())
}

pub fn render_locks(entries: &[LockEntry]) -> String {
    if entries.is_empty() {
        return "No speaker locks.\n".to_string();
    }
    let mut out = format!("{:<48} {:>8} {:>8}  STATE\n", "LOCK", "PID", "AGE");
    for entry in entries {
        let name = entry
            .path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        let pid = entry.pid.map_or_else(|| "?".to_string(), |pid| pid.to_string());
        let _ = writeln!(
            out,
            "{name:<48} {pid:>8} {:>7}s  {}",
            entry.age.as_secs(),
            if entry.stale { "stale" } else { "live" }
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voxgate_core::LockKey;

    #[test]
    fn lists_live_locks_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(dir.path(), Duration::from_secs(30));
        let _guard = locks.try_acquire(&LockKey::new("s1", "stop", None)).unwrap();

        let out = render_locks(&locks.list().unwrap());
        assert!(out.contains("s1__stop__main-"));
        assert!(out.contains(&std::process::id().to_string()));
        assert!(out.contains("live"));
    }

    #[test]
    fn empty_directory() {
        assert_eq!(render_locks(&[]), "No speaker locks.\n");
    }
}
