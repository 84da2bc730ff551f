//! systemd-boot: the UEFI-class backend.
//!
//! Kernels are installed into `EFI/<vendor>` on the ESP and described by one
//! Boot Loader Specification entry each under `loader/entries`. The default
//! lives in `loader/loader.conf`.

use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use super::{BootContext, Bootloader};
use crate::caps::Capabilities;
use crate::error::{Error, IoContext, Result};
use crate::files;
use crate::kernel::Kernel;

/// EFI blob shipped by systemd, relative to the prefix.
pub const SYSTEMD_BOOT_EFI: &str = "usr/lib/systemd/boot/efi/systemd-bootx64.efi";
pub const LOADER_CONF: &str = "loader/loader.conf";
pub const ENTRIES_DIR: &str = "loader/entries";
const INSTALLED_BLOBS: [&str; 2] = ["EFI/systemd/systemd-bootx64.efi", "EFI/Boot/BOOTX64.EFI"];
const FALLBACK_TIMEOUT: u32 = 5;

#[derive(Debug)]
pub struct SystemdBoot {
    vendor: String,
    kernel_dst: String,
    base_path: Option<PathBuf>,
}

impl SystemdBoot {
    pub fn new(vendor: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            kernel_dst: format!("/EFI/{}", vendor),
            base_path: None,
        }
    }

    fn base_path(&self) -> Result<&Path> {
        self.base_path
            .as_deref()
            .ok_or(Error::BootloaderInit("systemd-boot"))
    }

    /// Entry file stem for a kernel.
    pub fn entry_id(&self, kernel: &Kernel) -> String {
        format!(
            "{}-{}-{}-{}",
            self.vendor, kernel.ktype, kernel.version, kernel.release
        )
    }

    fn entry_path(&self, kernel: &Kernel) -> Result<PathBuf> {
        Ok(self
            .base_path()?
            .join(ENTRIES_DIR)
            .join(format!("{}.conf", self.entry_id(kernel))))
    }

    /// Render a Boot Loader Specification entry.
    pub fn render_entry(&self, ctx: &BootContext<'_>, kernel: &Kernel) -> Result<String> {
        let root = ctx
            .root_device()
            .ok_or(Error::InsaneConfig("root device unknown"))?;

        let mut out = format!(
            "title {} ({} {}-{})\n",
            self.vendor, kernel.ktype, kernel.version, kernel.release
        );
        out.push_str(&format!("linux {}/{}\n", self.kernel_dst, kernel.legacy_path));
        for initrd in kernel.initrd_path.as_deref().into_iter().chain(ctx.initrds.keys()) {
            out.push_str(&format!("initrd {}/{}\n", self.kernel_dst, initrd));
        }

        let mut options = vec![root.root_arg()];
        if let Some(luks) = &root.luks_uuid {
            options.push(format!("rd.luks.uuid={}", luks));
        }
        if !kernel.cmdline.is_empty() {
            options.push(kernel.cmdline.clone());
        }
        out.push_str(&format!("options {}\n", options.join(" ")));
        Ok(out)
    }

    fn write_if_changed(&self, ctx: &BootContext<'_>, path: &Path, text: &str) -> Result<()> {
        if files::read_text(path).as_deref() == Some(text) {
            debug!("{} unchanged", path.display());
            return Ok(());
        }
        files::write_atomic(path, text, 0o644)?;
        ctx.system.sync();
        Ok(())
    }

    fn copy_blobs(&self, ctx: &BootContext<'_>) -> Result<()> {
        let source = ctx.prefix().join(SYSTEMD_BOOT_EFI);
        let base = self.base_path()?;
        for blob in INSTALLED_BLOBS {
            let dest = base.join(blob);
            if files::copy_if_changed(&source, &dest, 0o644)? {
                info!("Installed {}", dest.display());
            }
        }
        ctx.system.sync();
        Ok(())
    }
}

impl Bootloader for SystemdBoot {
    fn name(&self) -> &'static str {
        "systemd-boot"
    }

    fn init(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        self.base_path = Some(ctx.boot_dir.clone());
        Ok(())
    }

    fn install_kernel(&mut self, ctx: &BootContext<'_>, kernel: &Kernel) -> Result<()> {
        let path = self.entry_path(kernel)?;
        let text = self.render_entry(ctx, kernel)?;
        self.write_if_changed(ctx, &path, &text)
    }

    fn remove_kernel(&mut self, _ctx: &BootContext<'_>, kernel: &Kernel) -> Result<()> {
        let path = self.entry_path(kernel)?;
        if files::remove_if_exists(&path)? {
            info!("Removed {}", path.display());
        }
        Ok(())
    }

    fn set_default_kernel(
        &mut self,
        ctx: &BootContext<'_>,
        kernel: Option<&Kernel>,
    ) -> Result<()> {
        let text = match kernel {
            Some(k) => format!("default {}.conf\n", self.entry_id(k)),
            None => format!("timeout {}\n", FALLBACK_TIMEOUT),
        };
        let path = self.base_path()?.join(LOADER_CONF);
        self.write_if_changed(ctx, &path, &text)
    }

    fn get_default_kernel(&self, ctx: &BootContext<'_>) -> Option<String> {
        let conf = files::read_text(&self.base_path.as_ref()?.join(LOADER_CONF))?;
        let entry = conf
            .lines()
            .find_map(|l| l.trim().strip_prefix("default "))?
            .trim()
            .trim_end_matches(".conf")
            .to_string();
        ctx.kernels
            .iter()
            .find(|k| self.entry_id(k) == entry)
            .map(|k| k.legacy_path.clone())
    }

    fn needs_install(&self, _ctx: &BootContext<'_>) -> bool {
        match self.base_path.as_ref() {
            Some(base) => INSTALLED_BLOBS.iter().any(|b| !base.join(b).exists()),
            None => true,
        }
    }

    fn needs_update(&self, ctx: &BootContext<'_>) -> bool {
        let source = ctx.prefix().join(SYSTEMD_BOOT_EFI);
        match self.base_path.as_ref() {
            Some(base) => INSTALLED_BLOBS
                .iter()
                .any(|b| !files::files_match(&source, &base.join(b))),
            None => true,
        }
    }

    fn install(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        let base = self.base_path()?.to_path_buf();
        fs::create_dir_all(base.join(ENTRIES_DIR))
            .io_context(|| format!("Failed to create {}", base.join(ENTRIES_DIR).display()))?;
        fs::create_dir_all(base.join(self.kernel_dst.trim_start_matches('/')))
            .io_context(|| format!("Failed to create kernel directory in {}", base.display()))?;
        self.copy_blobs(ctx)
    }

    fn update(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        self.copy_blobs(ctx)
    }

    fn remove(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        let base = self.base_path()?;
        for blob in INSTALLED_BLOBS {
            files::remove_if_exists(&base.join(blob))?;
        }
        ctx.system.sync();
        Ok(())
    }

    fn destroy(&mut self) {
        self.base_path = None;
    }

    fn capabilities(&self, ctx: &BootContext<'_>) -> Capabilities {
        let blob = ctx.prefix().join(SYSTEMD_BOOT_EFI);
        if !blob.is_file() {
            debug!("systemd-boot not found at {}", blob.display());
            return Capabilities::empty();
        }
        Capabilities::UEFI | Capabilities::GPT | Capabilities::FATFS
    }

    fn kernel_destination(&self) -> Option<&str> {
        Some(&self.kernel_dst)
    }
}
