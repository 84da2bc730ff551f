//! The boot manager: owns the system configuration and the active backend,
//! and sequences kernel operations around mounting the boot partition.
//!
//! Exactly one backend is live at a time. Re-pointing the boot directory is
//! always destroy-then-init of that backend, never an incremental update.

mod initrd;
mod mount;
mod update;

pub use initrd::FreestandingInitrds;
pub use mount::BootMount;

use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::bootloader::{self, BootContext, Bootloader, LoaderKind};
use crate::caps::Capabilities;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::files;
use crate::kernel::{self, Kernel};
use crate::sysconfig::{self, SystemConfig};
use crate::system::{HostSystem, System};

/// Running kernel as reported by uname: `<version>-<release>.<type>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemKernel {
    pub version: String,
    pub release: u32,
    pub ktype: String,
}

impl SystemKernel {
    pub fn parse(uname: &str) -> Option<Self> {
        let (rest, ktype) = uname.trim().rsplit_once('.')?;
        let (version, release) = rest.rsplit_once('-')?;
        Some(Self {
            version: version.to_string(),
            release: release.parse().ok()?,
            ktype: ktype.to_string(),
        })
    }
}

pub struct BootManager {
    config: Config,
    system: Box<dyn System>,
    loaders: Vec<LoaderKind>,
    image_mode: bool,
    sysconfig: Option<SystemConfig>,
    abs_boot_dir: Option<PathBuf>,
    bootloader: Option<Box<dyn Bootloader>>,
    initrds: FreestandingInitrds,
    sys_kernel: Option<SystemKernel>,
}

impl BootManager {
    /// Manager for the live host.
    pub fn new(config: Config) -> Self {
        let system = HostSystem::new(&config);
        let mut manager = Self::with_system(config, Box::new(system));
        match fs::read_to_string("/proc/sys/kernel/osrelease") {
            Ok(release) => {
                if !manager.set_uname(&release) {
                    warn!("Unable to parse the currently running kernel: {}", release.trim());
                }
            }
            Err(e) => warn!("Cannot read running kernel release: {}", e),
        }
        manager
    }

    /// Manager backed by an arbitrary [`System`].
    pub fn with_system(config: Config, system: Box<dyn System>) -> Self {
        Self {
            config,
            system,
            loaders: LoaderKind::priority(),
            image_mode: false,
            sysconfig: None,
            abs_boot_dir: None,
            bootloader: None,
            initrds: FreestandingInitrds::default(),
            sys_kernel: None,
        }
    }

    /// Restrict the backends considered by selection. Order is priority.
    pub fn set_loaders(&mut self, loaders: Vec<LoaderKind>) {
        self.loaders = loaders;
    }

    pub fn set_image_mode(&mut self, image_mode: bool) {
        self.image_mode = image_mode;
    }

    pub fn is_image_mode(&self) -> bool {
        self.image_mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sysconfig(&self) -> Option<&SystemConfig> {
        self.sysconfig.as_ref()
    }

    pub fn prefix(&self) -> Option<&Path> {
        self.sysconfig.as_ref().map(|c| c.prefix.as_path())
    }

    pub fn kernel_dir(&self) -> Option<PathBuf> {
        self.prefix().map(|p| p.join(&self.config.kernel_dir))
    }

    pub fn initrd_dir(&self) -> Option<PathBuf> {
        self.prefix().map(|p| p.join(&self.config.initrd_dir))
    }

    pub fn bootloader_name(&self) -> Option<&'static str> {
        self.bootloader.as_ref().map(|l| l.name())
    }

    pub fn initrds(&self) -> &FreestandingInitrds {
        &self.initrds
    }

    pub fn system_kernel(&self) -> Option<&SystemKernel> {
        self.sys_kernel.as_ref()
    }

    /// Record the running kernel from a uname release string.
    pub fn set_uname(&mut self, uname: &str) -> bool {
        self.sys_kernel = SystemKernel::parse(uname);
        match &self.sys_kernel {
            Some(_) => info!("Current running kernel: {}", uname.trim()),
            None => error!("Failed to parse given uname release: {}", uname.trim()),
        }
        self.sys_kernel.is_some()
    }

    /// Inspect a new root and select a backend for it.
    ///
    /// The previous configuration and backend are torn down first.
    pub fn set_prefix(&mut self, prefix: &Path) -> Result<()> {
        if let Some(mut loader) = self.bootloader.take() {
            loader.destroy();
        }
        self.sysconfig = None;
        self.abs_boot_dir = None;
        self.initrds.clear();

        let config = sysconfig::inspect_root(prefix, self.image_mode, self.system.as_ref())?;
        self.sysconfig = Some(config);
        self.select_bootloader()
    }

    fn select_bootloader(&mut self) -> Result<()> {
        let sysconfig = self
            .sysconfig
            .as_ref()
            .ok_or(Error::InsaneConfig("missing config"))?;
        let ctx = BootContext {
            config: &self.config,
            sysconfig,
            boot_dir: resolve_boot_dir(self.abs_boot_dir.as_deref(), sysconfig, &self.config),
            image_mode: self.image_mode,
            initrds: &self.initrds,
            kernels: &[],
            system: self.system.as_ref(),
        };
        let loader = bootloader::select_bootloader(&self.loaders, &ctx)?;
        self.bootloader = Some(loader);
        Ok(())
    }

    /// The boot directory: an explicitly set one, else `prefix + boot subpath`.
    pub fn boot_dir(&self) -> Option<PathBuf> {
        let sysconfig = self.sysconfig.as_ref()?;
        Some(resolve_boot_dir(
            self.abs_boot_dir.as_deref(),
            sysconfig,
            &self.config,
        ))
    }

    /// Point the manager at a new boot directory, re-initialising the
    /// backend if one is active.
    pub fn set_boot_dir(&mut self, dir: &Path) -> Result<()> {
        self.abs_boot_dir = Some(dir.to_path_buf());
        if self.bootloader.is_none() {
            return Ok(());
        }
        self.with_loader(&[], |loader, ctx| {
            loader.destroy();
            if let Err(e) = loader.init(ctx) {
                loader.destroy();
                error!("Re-initialisation of bootloader failed: {}", e);
                return Err(Error::BootloaderInit(loader.name()));
            }
            Ok(())
        })
    }

    /// Run `f` against the active backend with a context for this operation.
    fn with_loader<R>(
        &mut self,
        kernels: &[Kernel],
        f: impl FnOnce(&mut dyn Bootloader, &BootContext<'_>) -> Result<R>,
    ) -> Result<R> {
        let sysconfig = self
            .sysconfig
            .as_ref()
            .ok_or(Error::InsaneConfig("missing config"))?;
        let loader = self
            .bootloader
            .as_deref_mut()
            .ok_or(Error::NoActiveBootloader)?;
        let ctx = BootContext {
            config: &self.config,
            sysconfig,
            boot_dir: resolve_boot_dir(self.abs_boot_dir.as_deref(), sysconfig, &self.config),
            image_mode: self.image_mode,
            initrds: &self.initrds,
            kernels,
            system: self.system.as_ref(),
        };
        f(loader, &ctx)
    }

    /// Kernel operations need an active backend and an identified root.
    fn require_ready(&self) -> Result<&SystemConfig> {
        if self.bootloader.is_none() {
            return Err(Error::NoActiveBootloader);
        }
        let sysconfig = self
            .sysconfig
            .as_ref()
            .ok_or(Error::InsaneConfig("missing config"))?;
        if !sysconfig.is_sane() {
            return Err(Error::InsaneConfig("missing root device"));
        }
        Ok(sysconfig)
    }

    /// `/boot` on legacy systems lives on the root filesystem, and images
    /// are written in place.
    fn needs_mount(&self) -> bool {
        !self.image_mode
            && self
                .sysconfig
                .as_ref()
                .is_some_and(|c| !c.wants(Capabilities::LEGACY))
    }

    /// All kernels in the kernel directory of the current root.
    pub fn discover_kernels(&self) -> Result<Vec<Kernel>> {
        let prefix = self.prefix().ok_or(Error::InsaneConfig("missing config"))?;
        kernel::discover_kernels(prefix, &self.config)
    }

    fn discover_kernels_nonempty(&self) -> Result<Vec<Kernel>> {
        let kernels = self.discover_kernels()?;
        if kernels.is_empty() {
            let dir = self.kernel_dir().unwrap_or_default();
            error!("No kernels discovered in {}, bailing", dir.display());
            return Err(Error::NoKernels(dir));
        }
        Ok(kernels)
    }

    /// Place the kernel blob on the boot target, then queue it with the
    /// backend.
    pub fn install_kernel(&mut self, kernel: &Kernel) -> Result<()> {
        self.require_ready()?;
        self.with_loader(&[], |loader, ctx| {
            let target = bootloader::boot_target(loader, ctx)?;
            install_kernel_blobs(kernel, &target)?;
            loader.install_kernel(ctx, kernel)
        })
    }

    /// Remove the kernel blob from the boot target, then tell the backend.
    pub fn remove_kernel(&mut self, kernel: &Kernel) -> Result<()> {
        self.require_ready()?;
        self.with_loader(&[], |loader, ctx| {
            let target = bootloader::boot_target(loader, ctx)?;
            remove_kernel_blobs(kernel, &target)?;
            loader.remove_kernel(ctx, kernel)
        })
    }

    /// Make `kernel` the default boot entry.
    ///
    /// Fails with [`Error::NoMatchingKernel`] if no discovered kernel has the
    /// same identity, whether or not the boot partition could be mounted.
    pub fn set_default_kernel(&mut self, kernel: &Kernel) -> Result<()> {
        self.require_ready()?;
        let kernels = self.discover_kernels_nonempty()?;

        let mount = if self.needs_mount() {
            Some(self.mount_boot()?)
        } else {
            None
        };

        let result = if kernels.iter().any(|k| k.same_identity(kernel)) {
            self.with_loader(&kernels, |loader, ctx| {
                loader.set_default_kernel(ctx, Some(kernel))
            })
        } else {
            error!(
                "No matching kernel in {}, bailing",
                self.kernel_dir().unwrap_or_default().display()
            );
            Err(Error::NoMatchingKernel(kernel.name()))
        };

        if let Some(BootMount::Mounted(dir)) = mount {
            self.umount_boot(&dir);
        }
        result
    }

    /// Installed path of the current default kernel, if known.
    pub fn get_default_kernel(&mut self) -> Option<String> {
        self.require_ready().ok()?;
        let kernels = self.discover_kernels().unwrap_or_default();
        self.with_loader(&kernels, |loader, ctx| Ok(loader.get_default_kernel(ctx)))
            .ok()
            .flatten()
    }

    /// Discovered kernels, newest first, each prefixed with `"* "` if it is
    /// the current default and `"  "` otherwise.
    pub fn list_kernels(&mut self) -> Result<Vec<String>> {
        let mut kernels = self.discover_kernels_nonempty()?;
        kernel::sort_kernels(&mut kernels);

        let default = if self.needs_mount() {
            match self.mount_boot() {
                Ok(mount) => {
                    let default = self.get_default_kernel();
                    if let BootMount::Mounted(dir) = mount {
                        self.umount_boot(&dir);
                    }
                    default
                }
                Err(e) => {
                    warn!("Cannot mount boot directory to read default: {}", e);
                    None
                }
            }
        } else {
            self.get_default_kernel()
        };

        Ok(render_kernel_list(&kernels, default.as_deref()))
    }

    pub fn needs_install(&mut self) -> Result<bool> {
        self.with_loader(&[], |loader, ctx| Ok(loader.needs_install(ctx)))
    }

    pub fn needs_update(&mut self) -> Result<bool> {
        self.with_loader(&[], |loader, ctx| Ok(loader.needs_update(ctx)))
    }

    /// Capabilities of the active backend.
    pub fn bootloader_capabilities(&mut self) -> Result<Capabilities> {
        self.with_loader(&[], |loader, ctx| Ok(loader.capabilities(ctx)))
    }
}

impl Drop for BootManager {
    fn drop(&mut self) {
        if let Some(mut loader) = self.bootloader.take() {
            loader.destroy();
        }
    }
}

fn resolve_boot_dir(abs: Option<&Path>, sysconfig: &SystemConfig, config: &Config) -> PathBuf {
    if let Some(dir) = abs {
        return dir.to_path_buf();
    }
    let dir = sysconfig
        .prefix
        .join(config.boot_dir.trim_start_matches('/'));
    fs::canonicalize(&dir).unwrap_or(dir)
}

fn install_kernel_blobs(kernel: &Kernel, target: &Path) -> Result<()> {
    let dest = target.join(&kernel.legacy_path);
    if files::copy_if_changed(&kernel.source, &dest, 0o644)? {
        info!("Installed kernel {}", dest.display());
    }
    if let (Some(src), Some(name)) = (&kernel.initrd_source, &kernel.initrd_path) {
        let dest = target.join(name);
        if files::copy_if_changed(src, &dest, 0o644)? {
            info!("Installed initrd {}", dest.display());
        }
    }
    Ok(())
}

fn remove_kernel_blobs(kernel: &Kernel, target: &Path) -> Result<()> {
    if files::remove_if_exists(&target.join(&kernel.legacy_path))? {
        info!("Removed kernel {}", kernel.legacy_path);
    }
    if let Some(name) = &kernel.initrd_path {
        files::remove_if_exists(&target.join(name))?;
    }
    Ok(())
}

/// Render the kernel listing with default markers.
pub fn render_kernel_list(kernels: &[Kernel], default: Option<&str>) -> Vec<String> {
    kernels
        .iter()
        .map(|k| {
            if default == Some(k.legacy_path.as_str()) {
                format!("* {}", k.legacy_path)
            } else {
                format!("  {}", k.legacy_path)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel(release: u32) -> Kernel {
        Kernel {
            ktype: "native".to_string(),
            version: "5.0.0".to_string(),
            release,
            source: PathBuf::from(format!("/k/org.clearlinux.native.5.0.0-{}", release)),
            initrd_source: None,
            legacy_path: format!("org.clearlinux.native.5.0.0-{}", release),
            initrd_path: None,
            cmdline: String::new(),
        }
    }

    #[test]
    fn test_render_kernel_list_marks_default() {
        let kernels = vec![kernel(10), kernel(5)];
        let list = render_kernel_list(&kernels, Some("org.clearlinux.native.5.0.0-10"));
        assert_eq!(
            list,
            vec![
                "* org.clearlinux.native.5.0.0-10",
                "  org.clearlinux.native.5.0.0-5"
            ]
        );
    }

    #[test]
    fn test_render_kernel_list_without_default() {
        let list = render_kernel_list(&[kernel(5)], None);
        assert_eq!(list, vec!["  org.clearlinux.native.5.0.0-5"]);
    }

    #[test]
    fn test_system_kernel_parse() {
        let k = SystemKernel::parse("4.2.1-121.kvm\n").unwrap();
        assert_eq!(k.version, "4.2.1");
        assert_eq!(k.release, 121);
        assert_eq!(k.ktype, "kvm");
        assert!(SystemKernel::parse("6.8.0-generic").is_none());
    }
}
