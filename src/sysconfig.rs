//! Root inspection: where is the boot device, and what must a bootloader
//! support to boot this system?

use log::{debug, error, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::caps::Capabilities;
use crate::error::{Error, Result};
use crate::system::System;

/// Identity of a block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceProbe {
    /// Filesystem UUID.
    pub uuid: String,
    /// GPT partition UUID, if the filesystem lives on a GPT partition.
    pub part_uuid: Option<String>,
    /// UUID of the LUKS container the filesystem is unlocked from.
    pub luks_uuid: Option<String>,
}

impl DeviceProbe {
    /// The `root=` kernel argument, preferring the partition UUID.
    pub fn root_arg(&self) -> String {
        match &self.part_uuid {
            Some(part_uuid) => format!("root=PARTUUID={}", part_uuid),
            None => format!("root=UUID={}", self.uuid),
        }
    }
}

/// Result of inspecting a root prefix.
#[derive(Debug, Clone, Serialize)]
pub struct SystemConfig {
    /// Canonical absolute root path.
    pub prefix: PathBuf,
    /// Canonical boot device, if one was located.
    pub boot_device: Option<PathBuf>,
    /// Identity of the device backing the root, if the probe succeeded.
    pub root_device: Option<DeviceProbe>,
    /// Capabilities a bootloader must provide for this system.
    #[serde(serialize_with = "serialize_caps")]
    pub wanted_boot_mask: Capabilities,
}

fn serialize_caps<S: serde::Serializer>(caps: &Capabilities, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&caps.to_string())
}

impl SystemConfig {
    /// A configuration is usable for kernel operations only once the root
    /// device has been identified.
    pub fn is_sane(&self) -> bool {
        if self.root_device.is_none() {
            error!("sysconfig insane: Missing root device");
            return false;
        }
        true
    }

    pub fn wants(&self, caps: Capabilities) -> bool {
        self.wanted_boot_mask.contains(caps)
    }
}

/// Inspect `path` and derive the boot device and capability mask.
///
/// In image mode the live-system probes (firmware marker, running ESP) are
/// skipped and a plain UEFI system is assumed when nothing else is found.
pub fn inspect_root(path: &Path, image_mode: bool, system: &dyn System) -> Result<SystemConfig> {
    let prefix = fs::canonicalize(path).map_err(|_| {
        error!("Path specified does not exist: {}", path.display());
        Error::NotFound(path.to_path_buf())
    })?;

    // A native UEFI boot exposes <sysfs>/firmware/efi. Image builds never
    // trust the host's firmware.
    let native_uefi = !image_mode && system.sysfs_path().join("firmware/efi").exists();
    debug!("Native UEFI: {}", native_uefi);

    // GPT may carry both a legacy boot partition and an ESP; native UEFI wins.
    let mut boot_device = None;
    let mut wanted = Capabilities::empty();

    if !native_uefi || image_mode {
        if let Some(device) = system.legacy_boot_device(&prefix) {
            info!("Discovered legacy boot device: {}", device.display());
            wanted = Capabilities::LEGACY | Capabilities::GPT;
            boot_device = Some(device);
        }
    }

    if boot_device.is_none() && !image_mode {
        if let Some(device) = system.esp_device() {
            info!("Discovered UEFI ESP: {}", device.display());
            wanted = Capabilities::UEFI | Capabilities::GPT;
            boot_device = Some(device);
        }
    }

    if boot_device.is_none() {
        wanted = if image_mode || native_uefi {
            Capabilities::UEFI
        } else {
            Capabilities::LEGACY
        };
    }

    // Both probes are GPT only, so a found device is definitely GPT.
    let boot_device = match boot_device {
        Some(device) => {
            let device = match fs::canonicalize(&device) {
                Ok(resolved) => {
                    info!("Fully resolved boot device: {}", resolved.display());
                    resolved
                }
                Err(e) => {
                    warn!("Cannot resolve boot device {}: {}", device.display(), e);
                    device
                }
            };
            wanted |= Capabilities::GPT;
            let fstype = system.fstype(&device)?;
            wanted |= Capabilities::from_fstype(&fstype);
            Some(device)
        }
        None => None,
    };

    let root_device = match system.probe_path(&prefix) {
        Ok(probe) => Some(probe),
        Err(e) => {
            warn!("Cannot probe root device of {}: {}", prefix.display(), e);
            None
        }
    };

    debug!("Wanted boot mask: {}", wanted);

    Ok(SystemConfig {
        prefix,
        boot_device,
        root_device,
        wanted_boot_mask: wanted,
    })
}
