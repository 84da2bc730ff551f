//! Making the boot partition available.
//!
//! Only a [`BootMount::Mounted`] result belongs to the caller: it must be
//! paired with exactly one [`BootManager::umount_boot`]. An
//! [`BootMount::AlreadyMounted`] directory was mounted by someone else and
//! must be left alone.

use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use super::BootManager;
use crate::error::{Error, IoContext, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootMount {
    /// The boot directory was already available here. No unmount needed.
    AlreadyMounted(PathBuf),
    /// We mounted the boot device here.
    Mounted(PathBuf),
}

impl BootMount {
    pub fn path(&self) -> &Path {
        match self {
            BootMount::AlreadyMounted(p) | BootMount::Mounted(p) => p,
        }
    }

    pub fn did_mount(&self) -> bool {
        matches!(self, BootMount::Mounted(_))
    }
}

impl BootManager {
    /// Make the boot partition available, mounting it if nobody has.
    pub fn mount_boot(&mut self) -> Result<BootMount> {
        let boot_dir = self
            .boot_dir()
            .ok_or(Error::InsaneConfig("missing config"))?;

        debug!("Checking for mounted boot dir");
        if self.system.is_mounted(&boot_dir) {
            info!("boot_dir is already mounted: {}", boot_dir.display());
            return Ok(BootMount::AlreadyMounted(boot_dir));
        }

        let device = self
            .sysconfig
            .as_ref()
            .and_then(|c| c.boot_device.clone())
            .ok_or_else(|| {
                error!("Cannot determine boot device");
                Error::NoBootDevice
            })?;

        if let Some(existing) = self.system.mountpoint_for_device(&device) {
            // Paths may differ in location or case sensitivity, so the
            // backend is re-initialised against the existing mount.
            info!(
                "Boot device {} already mounted at {}",
                device.display(),
                existing.display()
            );
            self.set_boot_dir(&existing).map_err(|e| {
                error!("Cannot initialise with premounted boot device");
                e
            })?;
            return Ok(BootMount::AlreadyMounted(existing));
        }

        if !boot_dir.exists() {
            info!("Creating boot dir {}", boot_dir.display());
            fs::create_dir_all(&boot_dir)
                .io_context(|| format!("Failed to create {}", boot_dir.display()))?;
        }

        info!(
            "Mounting boot device {} at {}",
            device.display(),
            boot_dir.display()
        );
        self.system
            .mount(&device, &boot_dir, "vfat")
            .map_err(|source| {
                error!(
                    "Cannot mount boot device {} on {}: {}",
                    device.display(),
                    boot_dir.display(),
                    source
                );
                Error::Mount {
                    device: device.clone(),
                    target: boot_dir.clone(),
                    source,
                }
            })?;
        info!(
            "{} successfully mounted at {}",
            device.display(),
            boot_dir.display()
        );

        if let Err(e) = self.set_boot_dir(&boot_dir) {
            error!("Cannot initialise with newly mounted boot device");
            self.umount_boot(&boot_dir);
            return Err(e);
        }

        Ok(BootMount::Mounted(boot_dir))
    }

    /// Best-effort unmount. Failure is logged, never escalated.
    pub fn umount_boot(&self, boot_dir: &Path) {
        info!("Attempting umount of {}", boot_dir.display());
        match self.system.umount(boot_dir) {
            Ok(()) => info!("Unmounted boot directory"),
            Err(e) => warn!("Could not unmount boot directory: {}", e),
        }
    }
}
