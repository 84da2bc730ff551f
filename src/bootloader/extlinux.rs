//! extlinux: the legacy (BIOS/GPT) backend.
//!
//! Kernels are queued by `install_kernel` and the whole `extlinux.cfg` is
//! regenerated from the queue on `set_default_kernel`. Removal is therefore
//! implicit: a removed kernel disappears once the queue is rebuilt by `init`
//! and the configuration is flushed again.
//!
//! Installation writes the 440 byte GPT MBR boot code onto the parent disk of
//! the root filesystem and then runs `extlinux` against the boot directory.

use log::{debug, error, info};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::{BootContext, Bootloader};
use crate::caps::Capabilities;
use crate::error::{Error, IoContext, Result};
use crate::files;
use crate::kernel::Kernel;
use crate::process::{self, Cmd};

/// Size of the boot code area of an MBR.
pub const MBR_BOOT_CODE_SIZE: usize = 440;
/// extlinux binary, relative to the prefix.
pub const EXTLINUX_BIN: &str = "usr/bin/extlinux";
/// GPT-aware MBR boot code, relative to the prefix.
pub const GPTMBR_BIN: &str = "usr/share/extlinux/gptmbr.bin";
/// Present in the boot directory once extlinux has been installed.
pub const LDLINUX_MARKER: &str = "ldlinux.sys";
pub const CONFIG_FILE: &str = "extlinux.cfg";
/// Boot menu timeout (tenths of a second) used when no default is set.
pub const FALLBACK_TIMEOUT: u32 = 100;

/// Kernels to write into the configuration, in queue order.
///
/// The queue does not own kernels: it records their source paths and is
/// resolved against the kernels discovered for the flushing operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KernelQueue {
    sources: Vec<PathBuf>,
}

impl KernelQueue {
    /// Append a kernel. Returns false if its source path is already queued.
    pub fn push(&mut self, kernel: &Kernel) -> bool {
        if self.contains(&kernel.source) {
            return false;
        }
        self.sources.push(kernel.source.clone());
        true
    }

    pub fn contains(&self, source: &Path) -> bool {
        self.sources.iter().any(|s| s == source)
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.sources.iter().map(PathBuf::as_path)
    }
}

/// How `extlinux` is invoked on install/update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeMode {
    /// `extlinux -i`: fresh install.
    Install,
    /// `extlinux -U`: ldlinux.sys already present.
    Update,
}

impl FinalizeMode {
    fn flag(self) -> &'static str {
        match self {
            FinalizeMode::Install => "-i",
            FinalizeMode::Update => "-U",
        }
    }
}

#[derive(Debug, Default)]
pub struct Extlinux {
    queue: KernelQueue,
    base_path: Option<PathBuf>,
    finalize: Option<FinalizeMode>,
}

impl Extlinux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &KernelQueue {
        &self.queue
    }

    pub fn finalize_mode(&self) -> Option<FinalizeMode> {
        self.finalize
    }

    fn base_path(&self) -> Result<&Path> {
        self.base_path
            .as_deref()
            .ok_or(Error::BootloaderInit("extlinux"))
    }

    fn finalize_command(&self, ctx: &BootContext<'_>) -> Result<Cmd> {
        let mode = self.finalize.ok_or(Error::BootloaderInit("extlinux"))?;
        Ok(Cmd::new(ctx.prefix().join(EXTLINUX_BIN))
            .arg(mode.flag())
            .arg_path(self.base_path()?))
    }
}

/// Render `extlinux.cfg` for the queued kernels.
pub fn render_config(
    ctx: &BootContext<'_>,
    queue: &KernelQueue,
    default: Option<&Kernel>,
) -> Result<String> {
    let root = ctx
        .root_device()
        .ok_or(Error::InsaneConfig("root device unknown"))?;

    let mut out = String::new();
    if default.is_none() {
        out.push_str(&format!("TIMEOUT {}\n", FALLBACK_TIMEOUT));
    }

    for source in queue.iter() {
        let kernel = ctx
            .kernel_by_source(source)
            .ok_or_else(|| Error::StaleQueue(source.to_path_buf()))?;

        if default.is_some_and(|d| d.source == kernel.source) {
            out.push_str(&format!("DEFAULT {}\n", kernel.legacy_path));
        }
        out.push_str(&format!("LABEL {}\n", kernel.legacy_path));
        out.push_str(&format!("  KERNEL {}\n", kernel.legacy_path));

        let initrds: Vec<&str> = kernel
            .initrd_path
            .as_deref()
            .into_iter()
            .chain(ctx.initrds.keys())
            .collect();
        if !initrds.is_empty() {
            out.push_str(&format!("  INITRD {}\n", initrds.join(",")));
        }

        out.push_str("APPEND ");
        out.push_str(&root.root_arg());
        out.push(' ');
        if let Some(luks) = &root.luks_uuid {
            out.push_str(&format!("rd.luks.uuid={} ", luks));
        }
        out.push_str(&kernel.cmdline);
        out.push('\n');
    }

    Ok(out)
}

/// Read the `DEFAULT` entry back out of a rendered configuration.
pub fn parse_default(config: &str) -> Option<String> {
    config
        .lines()
        .find_map(|l| l.strip_prefix("DEFAULT "))
        .map(|s| s.trim().to_string())
}

impl Bootloader for Extlinux {
    fn name(&self) -> &'static str {
        "extlinux"
    }

    fn init(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        self.queue.clear();

        let base_path = ctx.boot_dir.clone();
        self.finalize = Some(if base_path.join(LDLINUX_MARKER).exists() {
            FinalizeMode::Update
        } else {
            FinalizeMode::Install
        });
        self.base_path = Some(base_path);
        Ok(())
    }

    fn install_kernel(&mut self, _ctx: &BootContext<'_>, kernel: &Kernel) -> Result<()> {
        // Repairs re-install kernels that are already queued
        if !self.queue.push(kernel) {
            debug!("{} already queued", kernel.legacy_path);
        }
        Ok(())
    }

    fn remove_kernel(&mut self, _ctx: &BootContext<'_>, _kernel: &Kernel) -> Result<()> {
        Ok(())
    }

    fn set_default_kernel(
        &mut self,
        ctx: &BootContext<'_>,
        kernel: Option<&Kernel>,
    ) -> Result<()> {
        let config_path = self.base_path()?.join(CONFIG_FILE);
        let text = render_config(ctx, &self.queue, kernel)?;

        if files::read_text(&config_path).as_deref() == Some(text.as_str()) {
            debug!("{} unchanged", config_path.display());
            return Ok(());
        }

        files::write_atomic(&config_path, &text, 0o644).map_err(|e| {
            error!("Failed to write {}: {}", config_path.display(), e);
            e
        })?;
        ctx.system.sync();
        info!("Wrote {}", config_path.display());
        Ok(())
    }

    fn get_default_kernel(&self, _ctx: &BootContext<'_>) -> Option<String> {
        let config_path = self.base_path.as_ref()?.join(CONFIG_FILE);
        parse_default(&files::read_text(&config_path)?)
    }

    fn needs_install(&self, _ctx: &BootContext<'_>) -> bool {
        true
    }

    fn needs_update(&self, _ctx: &BootContext<'_>) -> bool {
        true
    }

    fn install(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        let disk = ctx.system.parent_disk(ctx.prefix())?;
        let template = ctx.prefix().join(GPTMBR_BIN);

        let mut mbr = OpenOptions::new()
            .write(true)
            .open(&disk)
            .io_context(|| format!("Failed to open {}", disk.display()))?;
        let boot_code = File::open(&template)
            .io_context(|| format!("Failed to open {}", template.display()))?;

        let mut buf = Vec::with_capacity(MBR_BOOT_CODE_SIZE);
        boot_code
            .take(MBR_BOOT_CODE_SIZE as u64)
            .read_to_end(&mut buf)
            .io_context(|| format!("Failed to read {}", template.display()))?;
        if buf.len() != MBR_BOOT_CODE_SIZE {
            return Err(Error::ShortWrite {
                device: disk,
                expected: MBR_BOOT_CODE_SIZE,
                written: buf.len(),
            });
        }

        let written = mbr
            .write(&buf)
            .io_context(|| format!("Failed to write boot code to {}", disk.display()))?;
        if written != MBR_BOOT_CODE_SIZE {
            return Err(Error::ShortWrite {
                device: disk,
                expected: MBR_BOOT_CODE_SIZE,
                written,
            });
        }
        mbr.sync_all()
            .io_context(|| format!("Failed to sync {}", disk.display()))?;
        info!("Wrote MBR boot code to {}", disk.display());

        let cmd = self.finalize_command(ctx)?;
        let program = cmd.program().display().to_string();
        let code = ctx.system.run(cmd)?;
        if code != 0 {
            return Err(Error::Command { program, code });
        }

        ctx.system.sync();
        Ok(())
    }

    fn update(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        self.install(ctx)
    }

    fn remove(&mut self, _ctx: &BootContext<'_>) -> Result<()> {
        Ok(())
    }

    fn destroy(&mut self) {
        self.queue.clear();
        self.base_path = None;
        self.finalize = None;
    }

    fn capabilities(&self, ctx: &BootContext<'_>) -> Capabilities {
        let command = ctx.prefix().join(EXTLINUX_BIN);
        if !process::is_executable(&command) {
            debug!("extlinux not found at {}", command.display());
            return Capabilities::empty();
        }
        // syslinux reads both ext and FAT boot partitions
        Capabilities::GPT | Capabilities::LEGACY | Capabilities::EXTFS | Capabilities::FATFS
    }
}
