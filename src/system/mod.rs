//! Host interaction boundary.
//!
//! Everything that touches the mount table, block devices, firmware state or
//! runs a privileged helper goes through [`System`]. The boot manager and the
//! backends never call into the host directly, which keeps them testable
//! against a playground root.

mod host;

pub use host::HostSystem;

use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::process::Cmd;
use crate::sysconfig::DeviceProbe;

pub trait System {
    /// Root of the virtual firmware filesystem (normally `/sys`).
    fn sysfs_path(&self) -> PathBuf;

    /// True if `path` is a mount point.
    fn is_mounted(&self, path: &Path) -> bool;

    /// Where `device` is currently mounted, if anywhere.
    fn mountpoint_for_device(&self, device: &Path) -> Option<PathBuf>;

    fn mount(&self, device: &Path, target: &Path, fstype: &str) -> io::Result<()>;

    fn umount(&self, target: &Path) -> io::Result<()>;

    /// Flush filesystem buffers.
    fn sync(&self);

    /// GPT partition holding `<root>/boot` as a filesystem distinct from
    /// `root`, flagged legacy-bootable.
    fn legacy_boot_device(&self, root: &Path) -> Option<PathBuf>;

    /// The EFI System Partition the firmware booted from.
    fn esp_device(&self) -> Option<PathBuf>;

    /// Whole-disk device holding the filesystem at `root`.
    fn parent_disk(&self, root: &Path) -> Result<PathBuf>;

    /// Filesystem type of a block device, as blkid reports it.
    fn fstype(&self, device: &Path) -> Result<String>;

    /// Identity of the device backing `path`.
    fn probe_path(&self, path: &Path) -> Result<DeviceProbe>;

    /// Run an external command and return its exit code.
    fn run(&self, cmd: Cmd) -> Result<i32>;
}
