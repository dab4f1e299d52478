//! `voxgate` entry point.
//!
//! Each command gets the runtime shape it needs: the daemon runs on a
//! multi-threaded runtime, producers on a current-thread one.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tokio::runtime::{Builder, Runtime};
use voxgate_cli::{Cli, CliContext, CliError, Commands, LogTarget, handlers, logging};

fn main() -> ExitCode {
    // Load .env before any VOXGATE_* variable is read.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            eprintln!("voxgate: {err:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let ctx = match CliContext::load(cli.verbose) {
        Ok(ctx) => ctx,
        // Hooks must never see a failure from `speak`, bad settings included.
        Err(e) if matches!(command, Commands::Speak(_)) => {
            let _log_guard = logging::init(&LogTarget::Quiet, cli.verbose).ok().flatten();
            tracing::debug!(error = %e, "speak skipped: unusable settings");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let target = match &command {
        Commands::Daemon { foreground: false } => LogTarget::File(ctx.paths.daemon_log.clone()),
        Commands::Speak(_) => LogTarget::Quiet,
        _ => LogTarget::Stderr,
    };
    let _log_guard = logging::init(&target, ctx.debug).map_err(CliError::from)?;

    match command {
        Commands::Daemon { .. } => {
            multi_thread()?.block_on(handlers::daemon::execute(&ctx))?;
        }
        Commands::Speak(args) => {
            let spoken = current_thread()
                .and_then(|runtime| runtime.block_on(handlers::speak::execute(&ctx, args)));
            if let Err(e) = spoken {
                tracing::debug!(error = %e, "speak failed");
            }
        }
        Commands::Status { json } => {
            current_thread()?.block_on(handlers::status::execute(&ctx, json))?;
        }
        Commands::Backends => {
            current_thread()?.block_on(handlers::backends::execute(&ctx));
        }
        Commands::Devices => handlers::devices::execute()?,
        Commands::Transcribe { file } => {
            current_thread()?.block_on(handlers::transcribe::execute(&ctx, &file))?;
        }
        Commands::Locks { command } => handlers::locks::execute(&ctx, command)?,
        Commands::Paths => handlers::paths::execute(&ctx),
    }
    Ok(())
}

fn current_thread() -> Result<Runtime, CliError> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

fn multi_thread() -> Result<Runtime, CliError> {
    Ok(Builder::new_multi_thread().enable_all().build()?)
}
