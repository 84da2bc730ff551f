//! Show command - displays configuration and the inspected system.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

use bootman::config::Config;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the inspected root and the selected bootloader as JSON
    System,
}

/// Execute the show command.
pub fn cmd_show(
    prefix: &Path,
    image_mode: bool,
    target: ShowTarget,
    config: &Config,
) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::System => {
            let mut manager = super::open_manager(prefix, image_mode, config)?;
            let caps = manager.bootloader_capabilities()?;
            let report = json!({
                "sysconfig": manager.sysconfig(),
                "boot_dir": manager.boot_dir(),
                "bootloader": manager.bootloader_name(),
                "bootloader_capabilities": caps.to_string(),
                "image_mode": manager.is_image_mode(),
            });
            let text = serde_json::to_string_pretty(&report)
                .context("Cannot serialise system report")?;
            println!("{}", text);
        }
    }
    Ok(())
}
