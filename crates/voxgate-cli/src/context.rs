//! Settings and paths shared by every command.

use voxgate_core::paths::ResolvedPaths;
use voxgate_core::Settings;

use crate::error::CliError;

/// Loaded once per invocation, after `.env` has been applied.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub settings: Settings,
    pub paths: ResolvedPaths,
    /// `--verbose` or `VOXGATE_DEBUG`.
    pub debug: bool,
}

impl CliContext {
    pub fn load(verbose: bool) -> Result<Self, CliError> {
        let settings = Settings::from_env()?;
        let paths = ResolvedPaths::from_env()?;
        Ok(Self::new(settings, paths, verbose))
    }

    pub fn new(settings: Settings, paths: ResolvedPaths, verbose: bool) -> Self {
        let debug = verbose || settings.debug;
        Self {
            settings,
            paths,
            debug,
        }
    }
}
