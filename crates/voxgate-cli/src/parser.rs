//! Root CLI structure and global options.

use clap::Parser;

use crate::commands::Commands;

/// Coordinate spoken output across independent processes.
#[derive(Debug, Parser)]
#[command(name = "voxgate")]
#[command(about = "Coordinate spoken audio across independent producer processes")]
#[command(version)]
pub struct Cli {
    /// Debug-level logging (same as VOXGATE_DEBUG=1)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::LocksCommand;
    use clap::CommandFactory;
    use voxgate_core::Priority;

    #[test]
    fn parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn speak_defaults() {
        let cli = Cli::parse_from(["voxgate", "speak", "Build finished"]);
        match cli.command {
            Some(Commands::Speak(args)) => {
                assert_eq!(args.text.as_deref(), Some("Build finished"));
                assert_eq!(args.priority, Priority::Normal);
                assert_eq!(args.event, "manual");
                assert!(args.agent.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn speak_accepts_priority_in_any_case() {
        let cli = Cli::parse_from([
            "voxgate", "-v", "speak", "--priority", "high", "--session", "s1", "--event",
            "stop", "--agent", "helper", "--backend", "piper", "hi",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Speak(args)) => {
                assert_eq!(args.priority, Priority::High);
                assert_eq!(args.session, "s1");
                assert_eq!(args.event, "stop");
                assert_eq!(args.agent.as_deref(), Some("helper"));
                assert_eq!(args.backend.as_deref(), Some("piper"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_priority_is_rejected() {
        assert!(Cli::try_parse_from(["voxgate", "speak", "--priority", "urgent", "hi"]).is_err());
    }

    #[test]
    fn locks_subcommands() {
        let cli = Cli::parse_from(["voxgate", "locks", "clean"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Locks {
                command: LocksCommand::Clean
            })
        ));
    }

    #[test]
    fn daemon_foreground_flag() {
        let cli = Cli::parse_from(["voxgate", "daemon", "--foreground"]);
        assert!(matches!(cli.command, Some(Commands::Daemon { foreground: true })));
    }
}
