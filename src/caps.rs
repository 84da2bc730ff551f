//! Capability masks shared by system inspection and bootloader backends.
//!
//! A system configuration describes the capabilities it *requires*; each
//! backend reports the capabilities it *provides*. A backend is eligible when
//! it provides every required bit. Extra bits are fine.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Boot mode and filesystem capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        /// GUID partition table.
        const GPT = 1 << 0;
        /// Native UEFI boot.
        const UEFI = 1 << 1;
        /// BIOS-style boot from the MBR.
        const LEGACY = 1 << 2;
        /// Boot partition is ext2/3/4.
        const EXTFS = 1 << 3;
        /// Boot partition is vfat.
        const FATFS = 1 << 4;
    }
}

impl Capabilities {
    /// True if `self` (what a backend provides) covers everything in `wanted`.
    pub fn satisfies(self, wanted: Capabilities) -> bool {
        (self & wanted) == wanted
    }

    /// Capability bit for a filesystem type string as reported by blkid.
    ///
    /// Unknown types contribute nothing.
    pub fn from_fstype(fstype: &str) -> Capabilities {
        match fstype {
            "ext2" | "ext3" | "ext4" => Capabilities::EXTFS,
            "vfat" => Capabilities::FATFS,
            _ => Capabilities::empty(),
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join("|"))
    }
}
