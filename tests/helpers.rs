//! Shared test utilities for bootman tests.
//!
//! `Playground` lays out a root filesystem in a temporary directory and
//! `FakeSystem` stands in for the host, recording every mount, unmount,
//! sync and command so tests can assert on side effects.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

use bootman::bootloader::extlinux::{EXTLINUX_BIN, GPTMBR_BIN};
use bootman::config::Config;
use bootman::process::Cmd;
use bootman::sysconfig::DeviceProbe;
use bootman::system::System;
use bootman::{BootManager, Error, Result};

pub const VENDOR: &str = "org.clearlinux";
pub const ROOT_UUID: &str = "7b5d0a1c-9a4f-4bd0-a1d5-2c1e4a5e6f70";
pub const ROOT_PARTUUID: &str = "e1f2a3b4-0001-4c5d-8e9f-a0b1c2d3e4f5";

/// Observable host state behind a `FakeSystem`.
#[derive(Debug, Default)]
pub struct FakeState {
    pub sysfs: PathBuf,
    /// Paths that count as mount points.
    pub mounted: HashSet<PathBuf>,
    /// Device to mount point, for devices mounted elsewhere.
    pub device_mounts: HashMap<PathBuf, PathBuf>,
    /// (device, target, fstype) for every successful mount.
    pub mounts: Vec<(PathBuf, PathBuf, String)>,
    pub umounts: Vec<PathBuf>,
    pub syncs: usize,
    /// Program followed by its arguments, per command run.
    pub commands: Vec<Vec<String>>,
    pub legacy_device: Option<PathBuf>,
    pub esp_device: Option<PathBuf>,
    pub parent_disk: Option<PathBuf>,
    pub fstype: Option<String>,
    pub probe: Option<DeviceProbe>,
    pub exit_code: i32,
    pub fail_mount: bool,
}

/// In-memory host. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeSystem {
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeSystem {
    pub fn new(sysfs: &Path) -> Self {
        let fake = Self::default();
        fake.state.borrow_mut().sysfs = sysfs.to_path_buf();
        fake
    }

    pub fn syncs(&self) -> usize {
        self.state.borrow().syncs
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.borrow().commands.clone()
    }

    pub fn mounts(&self) -> Vec<(PathBuf, PathBuf, String)> {
        self.state.borrow().mounts.clone()
    }

    pub fn umounts(&self) -> Vec<PathBuf> {
        self.state.borrow().umounts.clone()
    }
}

impl System for FakeSystem {
    fn sysfs_path(&self) -> PathBuf {
        self.state.borrow().sysfs.clone()
    }

    fn is_mounted(&self, path: &Path) -> bool {
        self.state.borrow().mounted.contains(path)
    }

    fn mountpoint_for_device(&self, device: &Path) -> Option<PathBuf> {
        self.state.borrow().device_mounts.get(device).cloned()
    }

    fn mount(&self, device: &Path, target: &Path, fstype: &str) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_mount {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        state.mounted.insert(target.to_path_buf());
        state
            .mounts
            .push((device.to_path_buf(), target.to_path_buf(), fstype.to_string()));
        Ok(())
    }

    fn umount(&self, target: &Path) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.mounted.remove(target);
        state.umounts.push(target.to_path_buf());
        Ok(())
    }

    fn sync(&self) {
        self.state.borrow_mut().syncs += 1;
    }

    fn legacy_boot_device(&self, _root: &Path) -> Option<PathBuf> {
        self.state.borrow().legacy_device.clone()
    }

    fn esp_device(&self) -> Option<PathBuf> {
        self.state.borrow().esp_device.clone()
    }

    fn parent_disk(&self, root: &Path) -> Result<PathBuf> {
        self.state.borrow().parent_disk.clone().ok_or(Error::Probe {
            device: root.to_path_buf(),
            reason: "no parent disk".to_string(),
        })
    }

    fn fstype(&self, device: &Path) -> Result<String> {
        self.state.borrow().fstype.clone().ok_or(Error::Probe {
            device: device.to_path_buf(),
            reason: "no filesystem type".to_string(),
        })
    }

    fn probe_path(&self, path: &Path) -> Result<DeviceProbe> {
        self.state.borrow().probe.clone().ok_or(Error::Probe {
            device: path.to_path_buf(),
            reason: "no UUID".to_string(),
        })
    }

    fn run(&self, cmd: Cmd) -> Result<i32> {
        let mut line = vec![cmd.program().display().to_string()];
        line.extend(cmd.arg_strings());
        let mut state = self.state.borrow_mut();
        state.commands.push(line);
        Ok(state.exit_code)
    }
}

/// A root filesystem in a temporary directory.
pub struct Playground {
    /// Temporary directory (kept alive for lifetime of Playground)
    pub _temp_dir: TempDir,
    pub root: PathBuf,
    pub sysfs: PathBuf,
    /// File standing in for the whole disk the MBR is written to.
    pub disk: PathBuf,
    pub fake: FakeSystem,
}

impl Playground {
    /// Empty root with a probeable root device and no boot device.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = fs::canonicalize(temp_dir.path()).expect("Failed to resolve temp dir");
        let root = base.join("root");
        let sysfs = base.join("sys");
        let disk = base.join("disk.img");

        fs::create_dir_all(root.join("usr/lib/kernel")).expect("Failed to create kernel dir");
        fs::create_dir_all(root.join("boot")).expect("Failed to create boot dir");
        fs::create_dir_all(&sysfs).expect("Failed to create sysfs");
        fs::write(&disk, vec![0u8; 4096]).expect("Failed to create disk image");

        let fake = FakeSystem::new(&sysfs);
        {
            let mut state = fake.state.borrow_mut();
            state.parent_disk = Some(disk.clone());
            state.probe = Some(DeviceProbe {
                uuid: ROOT_UUID.to_string(),
                part_uuid: None,
                luks_uuid: None,
            });
        }

        Self {
            _temp_dir: temp_dir,
            root,
            sysfs,
            disk,
            fake,
        }
    }

    /// GPT legacy system whose boot partition has filesystem `fstype`.
    pub fn legacy(fstype: &str) -> Self {
        let pg = Self::new();
        {
            let mut state = pg.fake.state.borrow_mut();
            state.legacy_device = Some(PathBuf::from("/dev/fake-sda1"));
            state.fstype = Some(fstype.to_string());
        }
        pg.install_extlinux();
        pg
    }

    /// Native UEFI system with a vfat ESP.
    pub fn uefi() -> Self {
        let pg = Self::new();
        fs::create_dir_all(pg.sysfs.join("firmware/efi")).expect("Failed to create efi marker");
        {
            let mut state = pg.fake.state.borrow_mut();
            state.esp_device = Some(PathBuf::from("/dev/fake-esp"));
            state.fstype = Some("vfat".to_string());
        }
        pg
    }

    pub fn config(&self) -> Config {
        Config {
            sysfs: self.sysfs.clone(),
            ..Config::default()
        }
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.root.join("boot")
    }

    pub fn kernel_dir(&self) -> PathBuf {
        self.root.join("usr/lib/kernel")
    }

    /// Manager pointed at this root.
    pub fn manager(&self) -> BootManager {
        let mut manager = BootManager::with_system(self.config(), Box::new(self.fake.clone()));
        manager.set_prefix(&self.root).expect("Failed to set prefix");
        manager
    }

    /// Kernel file name for (`ktype`, `version`, `release`).
    pub fn kernel_name(ktype: &str, version: &str, release: u32) -> String {
        format!("{}.{}.{}-{}", VENDOR, ktype, version, release)
    }

    pub fn add_kernel(&self, ktype: &str, version: &str, release: u32) -> PathBuf {
        let path = self
            .kernel_dir()
            .join(Self::kernel_name(ktype, version, release));
        fs::write(&path, format!("kernel {} {} {}", ktype, version, release))
            .expect("Failed to write kernel");
        path
    }

    pub fn add_kernel_initrd(&self, ktype: &str, version: &str, release: u32) {
        let name = format!("initrd-{}", Self::kernel_name(ktype, version, release));
        fs::write(self.kernel_dir().join(name), "initrd").expect("Failed to write initrd");
    }

    pub fn add_kernel_cmdline(&self, ktype: &str, version: &str, release: u32, cmdline: &str) {
        let name = format!("cmdline-{}-{}.{}", version, release, ktype);
        fs::write(self.kernel_dir().join(name), cmdline).expect("Failed to write cmdline");
    }

    pub fn add_freestanding_initrd(&self, name: &str, content: &str) {
        let dir = self.root.join("usr/lib/initrd.d");
        fs::create_dir_all(&dir).expect("Failed to create initrd dir");
        fs::write(dir.join(name), content).expect("Failed to write freestanding initrd");
    }

    pub fn remove_freestanding_initrd(&self, name: &str) {
        fs::remove_file(self.root.join("usr/lib/initrd.d").join(name))
            .expect("Failed to remove freestanding initrd");
    }

    /// extlinux binary plus a 512 byte GPT MBR template with a
    /// recognisable pattern.
    pub fn install_extlinux(&self) {
        create_mock_binary(&self.root.join(EXTLINUX_BIN));
        let template: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
        let path = self.root.join(GPTMBR_BIN);
        fs::create_dir_all(path.parent().expect("template has a parent"))
            .expect("Failed to create extlinux dir");
        fs::write(path, template).expect("Failed to write gptmbr.bin");
    }

    pub fn install_systemd_boot(&self) {
        let path = self
            .root
            .join("usr/lib/systemd/boot/efi/systemd-bootx64.efi");
        fs::create_dir_all(path.parent().expect("blob has a parent"))
            .expect("Failed to create systemd-boot dir");
        fs::write(path, "systemd-boot").expect("Failed to write systemd-boot blob");
    }

    pub fn install_grub2(&self) {
        create_mock_binary(&self.root.join("usr/sbin/grub-mkconfig"));
        let cfg = self.boot_dir().join("grub/grub.cfg");
        fs::create_dir_all(cfg.parent().expect("grub.cfg has a parent"))
            .expect("Failed to create grub dir");
        fs::write(cfg, "# generated\n").expect("Failed to write grub.cfg");
    }

    pub fn set_probe(&self, probe: DeviceProbe) {
        self.fake.state.borrow_mut().probe = Some(probe);
    }
}

/// Create an executable shell script at `path`.
pub fn create_mock_binary(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, "#!/bin/sh\nexit 0\n").expect("Failed to create mock binary");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("Failed to set permissions");
}

/// Assert a file exists and contains the expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    assert!(path.exists(), "File should exist: {}", path.display());
    let content = fs::read_to_string(path).expect("Failed to read file");
    assert!(
        content.contains(expected),
        "File {} should contain '{}', got:\n{}",
        path.display(),
        expected,
        content
    );
}

/// Assert a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "File should exist: {}", path.display());
}
