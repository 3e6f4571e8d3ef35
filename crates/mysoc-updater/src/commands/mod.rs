//! CLI subcommands

pub mod daemon;
pub mod init;
pub mod rollback;
pub mod status;
pub mod update;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::AgentConfig;

/// Resolve and load the agent config for a command
fn load_config(explicit: Option<&Path>) -> Result<(AgentConfig, PathBuf)> {
    let path = AgentConfig::find(explicit)
        .context("no config file found, run 'mysoc-updater init' first")?;
    let config = AgentConfig::load(&path)?;
    Ok((config, path))
}
