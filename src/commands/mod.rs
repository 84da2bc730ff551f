//! CLI command handlers.
//!
//! Each submodule handles one CLI command:
//! - `update` - Sync the boot partition with the kernel directory
//! - `kernels` - List, select and remove kernels
//! - `mount` - Mount the boot partition and leave it mounted
//! - `show` - Display configuration and the inspected system
//! - `preflight` - Run preflight checks

mod kernels;
mod mount;
mod preflight;
pub mod show;
mod update;

pub use kernels::{cmd_list_kernels, cmd_remove_kernel, cmd_set_kernel};
pub use mount::cmd_mount_boot;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use update::cmd_update;

use anyhow::{Context, Result};
use std::path::Path;

use bootman::config::Config;
use bootman::BootManager;

/// Manager for the host, pointed at `prefix`.
fn open_manager(prefix: &Path, image_mode: bool, config: &Config) -> Result<BootManager> {
    let mut manager = BootManager::new(config.clone());
    manager.set_image_mode(image_mode);
    manager
        .set_prefix(prefix)
        .with_context(|| format!("Cannot initialise for root {}", prefix.display()))?;
    Ok(manager)
}
