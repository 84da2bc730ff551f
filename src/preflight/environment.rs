//! Checks against the root being managed.

use std::fs;
use std::path::Path;

use crate::bootloader::{extlinux, grub2};
use crate::config::Config;
use crate::kernel;
use crate::process;

use super::types::CheckResult;

/// Check privileges and kernel discovery in the root.
pub fn check_root(prefix: &Path, config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    // SAFETY: geteuid has no preconditions and cannot fail
    if unsafe { libc::geteuid() } == 0 {
        results.push(CheckResult::pass("root privileges"));
    } else {
        results.push(CheckResult::warn(
            "root privileges",
            "Not running as root - mounting and MBR writes will fail",
        ));
    }

    let kernel_dir = prefix.join(&config.kernel_dir);
    if !kernel_dir.is_dir() {
        results.push(CheckResult::fail(
            "kernel directory",
            &format!("{} does not exist", kernel_dir.display()),
        ));
        return results;
    }
    match kernel::discover_kernels(prefix, config) {
        Ok(kernels) if kernels.is_empty() => results.push(CheckResult::fail(
            "kernels",
            &format!(
                "No {}.<type>.<version>-<release> files in {}",
                config.vendor_prefix,
                kernel_dir.display()
            ),
        )),
        Ok(kernels) => results.push(CheckResult::pass_with(
            "kernels",
            &format!("{} discovered", kernels.len()),
        )),
        Err(e) => results.push(CheckResult::fail("kernels", &e.to_string())),
    }

    // Empty initrds are ignored at install time, flag them here
    let initrd_dir = prefix.join(&config.initrd_dir);
    if let Ok(entries) = fs::read_dir(&initrd_dir) {
        for entry in entries.flatten() {
            if entry.metadata().is_ok_and(|m| m.is_file() && m.len() == 0) {
                results.push(CheckResult::warn(
                    "freestanding initrd",
                    &format!("{} is empty and will be skipped", entry.path().display()),
                ));
            }
        }
    }

    results
}

/// Check which bootloader assets the root ships.
pub fn check_boot_assets(prefix: &Path, config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let extlinux_bin = prefix.join(extlinux::EXTLINUX_BIN);
    let gptmbr = prefix.join(extlinux::GPTMBR_BIN);
    if process::is_executable(&extlinux_bin) {
        results.push(CheckResult::pass_with("extlinux", &extlinux_bin.display().to_string()));
        match fs::metadata(&gptmbr) {
            Ok(m) if m.len() >= extlinux::MBR_BOOT_CODE_SIZE as u64 => {
                results.push(CheckResult::pass("gptmbr.bin"));
            }
            Ok(m) => results.push(CheckResult::fail(
                "gptmbr.bin",
                &format!(
                    "{} is {} bytes, need at least {}",
                    gptmbr.display(),
                    m.len(),
                    extlinux::MBR_BOOT_CODE_SIZE
                ),
            )),
            Err(_) => results.push(CheckResult::fail(
                "gptmbr.bin",
                &format!("{} not found", gptmbr.display()),
            )),
        }
    } else {
        results.push(CheckResult::skip("extlinux", "not installed in root"));
    }

    #[cfg(feature = "systemd-boot")]
    {
        use crate::bootloader::systemd_boot;
        let blob = prefix.join(systemd_boot::SYSTEMD_BOOT_EFI);
        if blob.is_file() {
            results.push(CheckResult::pass_with("systemd-boot", &blob.display().to_string()));
        } else {
            results.push(CheckResult::skip("systemd-boot", "not installed in root"));
        }
    }

    let mkconfig = prefix.join(grub2::GRUB_MKCONFIG);
    let grub_cfg = prefix
        .join(config.boot_dir.trim_start_matches('/'))
        .join(grub2::GRUB_CFG);
    if process::is_executable(&mkconfig) && grub_cfg.is_file() {
        results.push(CheckResult::pass_with("grub2", "existing configuration is kept"));
    } else {
        results.push(CheckResult::skip("grub2", "not in use"));
    }

    if !results.iter().any(|r| r.status == super::types::CheckStatus::Pass) {
        results.push(CheckResult::fail(
            "bootloader",
            "No supported bootloader found in root",
        ));
    }

    results
}
