//! Update command - syncs kernels, initrds and the bootloader.

use anyhow::{Context, Result};
use std::path::Path;

use bootman::config::Config;

/// Execute the update command.
pub fn cmd_update(prefix: &Path, image_mode: bool, config: &Config) -> Result<()> {
    let mut manager = super::open_manager(prefix, image_mode, config)?;
    manager.update().context("Update failed")?;
    println!(
        "Boot partition updated ({})",
        manager.bootloader_name().unwrap_or("no bootloader")
    );
    Ok(())
}
