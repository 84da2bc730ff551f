//! Mount command - makes the boot partition available and leaves it mounted.

use anyhow::{Context, Result};
use std::path::Path;

use bootman::config::Config;
use bootman::BootMount;

/// Execute the mount-boot command.
pub fn cmd_mount_boot(prefix: &Path, config: &Config) -> Result<()> {
    let mut manager = super::open_manager(prefix, false, config)?;
    match manager.mount_boot().context("Cannot mount boot partition")? {
        BootMount::AlreadyMounted(dir) => {
            println!("Boot partition already mounted at {}", dir.display())
        }
        BootMount::Mounted(dir) => println!("Boot partition mounted at {}", dir.display()),
    }
    Ok(())
}
