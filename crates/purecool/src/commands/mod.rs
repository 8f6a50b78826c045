//! Subcommand handlers.

pub mod config_cmd;
pub mod simulate;

use std::path::PathBuf;

use purecool_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config` / `PURECOOL_CONFIG`, else the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(purecool_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(purecool_config::load_config_from(&config_file(global))?)
}
