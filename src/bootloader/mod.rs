//! Bootloader backends.
//!
//! Each backend reports the capabilities it provides and implements the
//! kernel-queue and install/update operations. Backends are tried in a fixed
//! priority order and the first one covering the wanted mask wins, even if a
//! later one would match more closely.

pub mod extlinux;
pub mod grub2;
#[cfg(feature = "systemd-boot")]
pub mod systemd_boot;

use bitflags::bitflags;
use log::{debug, error, info};
use std::path::{Path, PathBuf};

use crate::caps::Capabilities;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::manager::FreestandingInitrds;
use crate::sysconfig::{DeviceProbe, SystemConfig};
use crate::system::System;

bitflags! {
    /// Operations accepted by `BootManager::modify_bootloader`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Operation: u32 {
        const INSTALL = 1 << 0;
        const UPDATE = 1 << 1;
        const REMOVE = 1 << 2;
        /// Skip the `needs_install`/`needs_update` gate.
        const NO_CHECK = 1 << 3;
    }
}

/// Everything a backend may look at while running one operation.
pub struct BootContext<'a> {
    pub config: &'a Config,
    pub sysconfig: &'a SystemConfig,
    /// Resolved boot directory.
    pub boot_dir: PathBuf,
    pub image_mode: bool,
    pub initrds: &'a FreestandingInitrds,
    /// Kernels discovered for this operation.
    pub kernels: &'a [Kernel],
    pub system: &'a dyn System,
}

impl BootContext<'_> {
    pub fn prefix(&self) -> &Path {
        &self.sysconfig.prefix
    }

    pub fn root_device(&self) -> Option<&DeviceProbe> {
        self.sysconfig.root_device.as_ref()
    }

    /// Look up a discovered kernel by its source path.
    pub fn kernel_by_source(&self, source: &Path) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.source == source)
    }
}

/// The backend contract.
pub trait Bootloader {
    fn name(&self) -> &'static str;

    /// Reset internal state and compute paths. Always starts from scratch.
    fn init(&mut self, ctx: &BootContext<'_>) -> Result<()>;

    fn install_kernel(&mut self, ctx: &BootContext<'_>, kernel: &Kernel) -> Result<()>;

    fn remove_kernel(&mut self, ctx: &BootContext<'_>, kernel: &Kernel) -> Result<()>;

    /// Persist the full configuration with `kernel` as the default, or with
    /// a timeout fallback when there is none.
    fn set_default_kernel(&mut self, ctx: &BootContext<'_>, kernel: Option<&Kernel>)
        -> Result<()>;

    /// Installed path of the current default kernel.
    fn get_default_kernel(&self, ctx: &BootContext<'_>) -> Option<String>;

    fn needs_install(&self, ctx: &BootContext<'_>) -> bool;

    fn needs_update(&self, ctx: &BootContext<'_>) -> bool;

    fn install(&mut self, ctx: &BootContext<'_>) -> Result<()>;

    fn update(&mut self, ctx: &BootContext<'_>) -> Result<()>;

    fn remove(&mut self, ctx: &BootContext<'_>) -> Result<()>;

    /// Release everything `init` set up.
    fn destroy(&mut self);

    fn capabilities(&self, ctx: &BootContext<'_>) -> Capabilities;

    /// Boot-relative directory kernels are installed to. Required for any
    /// backend reporting `UEFI`.
    fn kernel_destination(&self) -> Option<&str> {
        None
    }
}

/// The known backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Grub2,
    #[cfg(feature = "systemd-boot")]
    SystemdBoot,
    Extlinux,
}

impl LoaderKind {
    /// Selection order. GRUB2 goes first so an existing GRUB2 setup is kept;
    /// extlinux goes last.
    pub fn priority() -> Vec<LoaderKind> {
        vec![
            LoaderKind::Grub2,
            #[cfg(feature = "systemd-boot")]
            LoaderKind::SystemdBoot,
            LoaderKind::Extlinux,
        ]
    }

    #[cfg_attr(not(feature = "systemd-boot"), allow(unused_variables))]
    pub fn create(self, config: &Config) -> Box<dyn Bootloader> {
        match self {
            LoaderKind::Grub2 => Box::new(grub2::Grub2::new()),
            #[cfg(feature = "systemd-boot")]
            LoaderKind::SystemdBoot => {
                Box::new(systemd_boot::SystemdBoot::new(&config.vendor_prefix))
            }
            LoaderKind::Extlinux => Box::new(extlinux::Extlinux::new()),
        }
    }
}

/// Pick the first backend whose capabilities cover the wanted mask and
/// initialise it.
pub fn select_bootloader(
    kinds: &[LoaderKind],
    ctx: &BootContext<'_>,
) -> Result<Box<dyn Bootloader>> {
    let wanted = ctx.sysconfig.wanted_boot_mask;

    let mut selected = None;
    for kind in kinds {
        let loader = kind.create(ctx.config);
        let caps = loader.capabilities(ctx);
        debug!("{} provides {}", loader.name(), caps);
        if caps.satisfies(wanted) {
            selected = Some(loader);
            break;
        }
    }

    let Some(mut loader) = selected else {
        error!("Failed to find an appropriate bootloader for this system");
        return Err(Error::NoBootloader(wanted));
    };

    if wanted.contains(Capabilities::UEFI) {
        info!("UEFI boot now selected ({})", loader.name());
    } else {
        info!("Legacy boot now selected ({})", loader.name());
    }

    if let Err(e) = loader.init(ctx) {
        loader.destroy();
        error!("Cannot initialise bootloader {}: {}", loader.name(), e);
        return Err(Error::BootloaderInit(loader.name()));
    }

    Ok(loader)
}

/// Directory kernels and freestanding initrds are placed in: the boot
/// directory plus the kernel destination for UEFI backends.
pub fn boot_target(loader: &dyn Bootloader, ctx: &BootContext<'_>) -> Result<PathBuf> {
    if !loader.capabilities(ctx).contains(Capabilities::UEFI) {
        return Ok(ctx.boot_dir.clone());
    }
    let dest = loader
        .kernel_destination()
        .ok_or(Error::MissingKernelDestination(loader.name()))?;
    Ok(ctx.boot_dir.join(dest.trim_start_matches('/')))
}
