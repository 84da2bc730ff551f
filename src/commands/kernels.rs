//! Kernel commands - list, set default, remove.

use anyhow::{Context, Result};
use std::path::Path;

use bootman::config::Config;

/// Print discovered kernels, newest first, marking the default with `*`.
pub fn cmd_list_kernels(prefix: &Path, image_mode: bool, config: &Config) -> Result<()> {
    let mut manager = super::open_manager(prefix, image_mode, config)?;
    let lines = manager.list_kernels().context("Cannot list kernels")?;
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

/// Make `name` (`<type>.<version>-<release>`) the default kernel.
pub fn cmd_set_kernel(prefix: &Path, image_mode: bool, config: &Config, name: &str) -> Result<()> {
    let mut manager = super::open_manager(prefix, image_mode, config)?;
    manager
        .set_kernel(name)
        .with_context(|| format!("Cannot set default kernel to {}", name))?;
    println!("Default kernel set to {}", name);
    Ok(())
}

/// Remove `name` (`<type>.<version>-<release>`) from the root and the boot
/// partition.
pub fn cmd_remove_kernel(
    prefix: &Path,
    image_mode: bool,
    config: &Config,
    name: &str,
) -> Result<()> {
    let mut manager = super::open_manager(prefix, image_mode, config)?;
    manager
        .remove_kernel_by_name(name)
        .with_context(|| format!("Cannot remove kernel {}", name))?;
    println!("Removed {}", name);
    Ok(())
}
