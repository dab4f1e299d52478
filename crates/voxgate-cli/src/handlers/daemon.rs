//! `voxgate daemon`.

use tracing::info;
use voxgate_daemon::{DaemonConfig, run_until_signalled};

use crate::context::CliContext;
use crate::error::CliError;

/// Run the daemon until SIGINT, SIGTERM or idle shutdown.
pub async fn execute(ctx: &CliContext) -> Result<(), CliError> {
    let config = DaemonConfig::from_settings(&ctx.settings, ctx.paths.socket.clone());
    info!(
        socket = %config.socket_path.display(),
        pid = std::process::id(),
        version = voxgate_core::VERSION,
        "Starting voxgate daemon"
    );
    run_until_signalled(config).await?;
    info!("Daemon stopped");
    Ok(())
}
