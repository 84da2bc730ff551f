//! The live host: `/proc/self/mounts`, libc mount syscalls and the util-linux
//! probe tools.

use log::debug;
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use super::System;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::{self, Cmd};
use crate::sysconfig::DeviceProbe;

const MOUNTS_FILE: &str = "/proc/self/mounts";

/// systemd-boot publishes the partition it was loaded from here.
const LOADER_DEVICE_PART_UUID: &str =
    "firmware/efi/efivars/LoaderDevicePartUUID-4a67b082-0a4c-41cf-b6c7-440b29bb8c4f";

/// GPT attribute bit 2: legacy BIOS bootable.
const GPT_ATTR_LEGACY_BIOS_BOOTABLE: u64 = 1 << 2;

#[derive(Debug, Clone)]
pub struct HostSystem {
    sysfs: PathBuf,
    devfs: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    source: PathBuf,
    target: PathBuf,
}

impl HostSystem {
    pub fn new(config: &Config) -> Self {
        Self {
            sysfs: config.sysfs.clone(),
            devfs: config.devfs.clone(),
        }
    }

    fn tool(&self, name: &str) -> Result<PathBuf> {
        process::which(name).ok_or_else(|| Error::Probe {
            device: PathBuf::from(name),
            reason: format!("'{}' not found in PATH (install util-linux)", name),
        })
    }

    fn mounts(&self) -> Vec<MountEntry> {
        match fs::read_to_string(MOUNTS_FILE) {
            Ok(content) => parse_mounts(&content),
            Err(e) => {
                debug!("Cannot read {}: {}", MOUNTS_FILE, e);
                Vec::new()
            }
        }
    }

    /// Device backing the filesystem that contains `path`.
    fn source_device(&self, path: &Path) -> Result<PathBuf> {
        let result = Cmd::new(self.tool("findmnt")?)
            .args(["-n", "-o", "SOURCE", "--target"])
            .arg_path(path)
            .run()
            .map_err(|e| probe_error(path, e))?;
        let source = result.stdout_trimmed();
        if source.is_empty() {
            return Err(Error::Probe {
                device: path.to_path_buf(),
                reason: "no backing device".to_string(),
            });
        }
        // btrfs subvolumes are reported as /dev/sda2[/@]
        let source = source.split('[').next().unwrap_or(source);
        Ok(PathBuf::from(source))
    }

    fn lsblk_value(&self, device: &Path, column: &str) -> Result<String> {
        let result = Cmd::new(self.tool("lsblk")?)
            .args(["-n", "-d", "-o", column])
            .arg_path(device)
            .run()
            .map_err(|e| probe_error(device, e))?;
        Ok(result.stdout_trimmed().to_string())
    }

    fn blkid_value(&self, device: &Path, tag: &str) -> Result<Option<String>> {
        let result = Cmd::new(self.tool("blkid")?)
            .args(["-s", tag, "-o", "value"])
            .arg_path(device)
            .allow_fail()
            .run()?;
        let value = result.stdout_trimmed();
        if !result.success() || value.is_empty() {
            return Ok(None);
        }
        Ok(Some(value.to_string()))
    }

    fn luks_uuid(&self, device: &Path) -> Result<Option<String>> {
        if self.lsblk_value(device, "TYPE")? != "crypt" {
            return Ok(None);
        }
        let parent = self.lsblk_value(device, "PKNAME")?;
        if parent.is_empty() {
            return Ok(None);
        }
        self.blkid_value(&self.devfs.join(parent), "UUID")
    }
}

impl System for HostSystem {
    fn sysfs_path(&self) -> PathBuf {
        self.sysfs.clone()
    }

    fn is_mounted(&self, path: &Path) -> bool {
        let path = canonical_or_raw(path);
        self.mounts().iter().any(|m| m.target == path)
    }

    fn mountpoint_for_device(&self, device: &Path) -> Option<PathBuf> {
        let device = canonical_or_raw(device);
        self.mounts()
            .into_iter()
            .find(|m| canonical_or_raw(&m.source) == device)
            .map(|m| m.target)
    }

    fn mount(&self, device: &Path, target: &Path, fstype: &str) -> io::Result<()> {
        let source = cstring(device.as_os_str().as_bytes())?;
        let target = cstring(target.as_os_str().as_bytes())?;
        let fstype = cstring(fstype.as_bytes())?;
        let data = cstring(b"")?;

        // SAFETY: all pointers are valid NUL-terminated strings for the call.
        let rc = unsafe {
            libc::mount(
                source.as_ptr(),
                target.as_ptr(),
                fstype.as_ptr(),
                libc::MS_MGC_VAL,
                data.as_ptr() as *const libc::c_void,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn umount(&self, target: &Path) -> io::Result<()> {
        let target = cstring(target.as_os_str().as_bytes())?;
        // SAFETY: target is a valid NUL-terminated string.
        let rc = unsafe { libc::umount(target.as_ptr()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn sync(&self) {
        // SAFETY: sync(2) takes no arguments and cannot fail.
        unsafe { libc::sync() };
    }

    fn legacy_boot_device(&self, root: &Path) -> Option<PathBuf> {
        let boot = root.join("boot");
        let root_dev = fs::metadata(root).ok()?.dev();
        let boot_dev = fs::metadata(&boot).ok()?.dev();
        if root_dev == boot_dev {
            return None;
        }

        let device = self.source_device(&boot).ok()?;
        let pttype = self.lsblk_value(&device, "PTTYPE").ok()?;
        if pttype != "gpt" {
            debug!("{} is not on a GPT disk ({})", device.display(), pttype);
            return None;
        }
        let flags = self.lsblk_value(&device, "PARTFLAGS").ok()?;
        if parse_partflags(&flags) & GPT_ATTR_LEGACY_BIOS_BOOTABLE == 0 {
            debug!("{} is not flagged legacy bootable", device.display());
            return None;
        }
        Some(device)
    }

    fn esp_device(&self) -> Option<PathBuf> {
        let var = self.sysfs.join(LOADER_DEVICE_PART_UUID);
        let raw = fs::read(&var).ok()?;
        let uuid = decode_efivar_string(&raw)?;
        let device = self.devfs.join("disk/by-partuuid").join(uuid);
        if device.exists() {
            Some(device)
        } else {
            debug!("ESP {} does not exist", device.display());
            None
        }
    }

    fn parent_disk(&self, root: &Path) -> Result<PathBuf> {
        let device = self.source_device(root)?;
        let parent = self.lsblk_value(&device, "PKNAME")?;
        if parent.is_empty() {
            return Err(Error::Probe {
                device,
                reason: "no parent disk".to_string(),
            });
        }
        Ok(self.devfs.join(parent))
    }

    fn fstype(&self, device: &Path) -> Result<String> {
        self.blkid_value(device, "TYPE")?.ok_or_else(|| Error::Probe {
            device: device.to_path_buf(),
            reason: "blkid reported no filesystem type".to_string(),
        })
    }

    fn probe_path(&self, path: &Path) -> Result<DeviceProbe> {
        let device = self.source_device(path)?;
        let uuid = self
            .blkid_value(&device, "UUID")?
            .ok_or_else(|| Error::Probe {
                device: device.clone(),
                reason: "no filesystem UUID".to_string(),
            })?;
        let part_uuid = self.blkid_value(&device, "PARTUUID")?;
        let luks_uuid = self.luks_uuid(&device)?;

        Ok(DeviceProbe {
            uuid,
            part_uuid,
            luks_uuid,
        })
    }

    fn run(&self, cmd: Cmd) -> Result<i32> {
        Ok(cmd.allow_fail().run()?.code())
    }
}

fn probe_error(device: &Path, err: Error) -> Error {
    Error::Probe {
        device: device.to_path_buf(),
        reason: err.to_string(),
    }
}

fn cstring(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Parse `/proc/self/mounts`, undoing the kernel's octal escapes.
fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some(MountEntry {
                source: PathBuf::from(unescape_mount_field(source)),
                target: PathBuf::from(unescape_mount_field(target)),
            })
        })
        .collect()
}

fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = std::str::from_utf8(&bytes[i + 1..i + 4]).ok();
            if let Some(value) = octal.and_then(|o| u8::from_str_radix(o, 8).ok()) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// lsblk reports GPT attributes as a hex string such as `0x4`.
fn parse_partflags(flags: &str) -> u64 {
    let flags = flags.trim();
    let hex = flags
        .strip_prefix("0x")
        .or_else(|| flags.strip_prefix("0X"))
        .unwrap_or(flags);
    u64::from_str_radix(hex, 16).unwrap_or(0)
}

/// EFI variables carry a 4 byte attribute header followed by UCS-2 text.
fn decode_efivar_string(raw: &[u8]) -> Option<String> {
    let payload = raw.get(4..)?;
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    let text = String::from_utf16(&units).ok()?;
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mounts() {
        let content = "\
/dev/sda2 / ext4 rw,relatime 0 0
/dev/sda1 /boot vfat rw 0 0
/dev/sdb1 /mnt/my\\040disk ext4 rw 0 0
";
        let mounts = parse_mounts(content);
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[1].source, PathBuf::from("/dev/sda1"));
        assert_eq!(mounts[1].target, PathBuf::from("/boot"));
        assert_eq!(mounts[2].target, PathBuf::from("/mnt/my disk"));
    }

    #[test]
    fn test_parse_partflags() {
        assert_eq!(parse_partflags("0x4"), 4);
        assert_eq!(parse_partflags("0x8000000000000004") & GPT_ATTR_LEGACY_BIOS_BOOTABLE, 4);
        assert_eq!(parse_partflags(""), 0);
        assert_eq!(parse_partflags("garbage"), 0);
    }

    #[test]
    fn test_decode_efivar_string() {
        let mut raw = vec![0x06, 0x00, 0x00, 0x00];
        for unit in "ABCD-12".encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        raw.extend_from_slice(&[0, 0]);
        assert_eq!(decode_efivar_string(&raw).as_deref(), Some("abcd-12"));
        assert_eq!(decode_efivar_string(&[0, 0]), None);
    }
}
