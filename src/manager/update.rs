//! Bootloader install/update and the full update sequence.

use log::{debug, error, info};

use super::{BootManager, BootMount};
use crate::bootloader::Operation;
use crate::error::{Error, Result};
use crate::files;
use crate::kernel::{self, Kernel};

impl BootManager {
    /// Install, update or remove the bootloader itself.
    ///
    /// The backend is re-initialised against the current boot directory
    /// first. INSTALL and UPDATE are skipped when the backend reports no need,
    /// unless [`Operation::NO_CHECK`] is set.
    pub fn modify_bootloader(&mut self, flags: Operation) -> Result<()> {
        self.require_ready()?;

        let boot_dir = self
            .boot_dir()
            .ok_or(Error::InsaneConfig("missing config"))?;
        self.set_boot_dir(&boot_dir)?;

        let no_check = flags.contains(Operation::NO_CHECK);
        self.with_loader(&[], |loader, ctx| {
            if flags.contains(Operation::INSTALL) {
                if no_check || loader.needs_install(ctx) {
                    info!("Installing {}", loader.name());
                    return loader.install(ctx);
                }
                debug!("{} does not need installing", loader.name());
                Ok(())
            } else if flags.contains(Operation::REMOVE) {
                info!("Removing {}", loader.name());
                loader.remove(ctx)
            } else if flags.contains(Operation::UPDATE) {
                if no_check || loader.needs_update(ctx) {
                    info!("Updating {}", loader.name());
                    return loader.update(ctx);
                }
                debug!("{} does not need updating", loader.name());
                Ok(())
            } else {
                error!("Unknown bootloader operation");
                Err(Error::UnknownOperation(flags.bits()))
            }
        })
    }

    /// Bring the boot partition in line with the kernel directory.
    pub fn update(&mut self) -> Result<()> {
        self.require_ready()?;
        let mut kernels = self.discover_kernels_nonempty()?;
        kernel::sort_kernels(&mut kernels);

        let mount = if self.needs_mount() {
            Some(self.mount_boot()?)
        } else {
            None
        };

        let result = self.update_mounted(&kernels);

        if let Some(BootMount::Mounted(dir)) = mount {
            self.umount_boot(&dir);
        }
        result
    }

    fn update_mounted(&mut self, kernels: &[Kernel]) -> Result<()> {
        let op = if self.image_mode {
            Operation::INSTALL | Operation::NO_CHECK
        } else if self.needs_install()? {
            Operation::INSTALL
        } else {
            Operation::UPDATE
        };
        self.modify_bootloader(op)?;

        self.sync_initrds_freestanding()?;

        let default = self.pick_default(kernels);
        if let Some(k) = default {
            info!("Default kernel: {}", k.legacy_path);
        }
        self.install_and_flush(kernels, default)
    }

    /// Install every kernel, then persist the configuration with `default`.
    fn install_and_flush(&mut self, kernels: &[Kernel], default: Option<&Kernel>) -> Result<()> {
        for kernel in kernels {
            self.install_kernel(kernel)?;
        }
        self.with_loader(kernels, |loader, ctx| {
            loader.set_default_kernel(ctx, default)
        })
    }

    /// Make the kernel named `<type>.<version>-<release>` the default.
    ///
    /// Every discovered kernel is re-queued first so the regenerated
    /// configuration lists all of them, not only the new default.
    pub fn set_kernel(&mut self, name: &str) -> Result<()> {
        self.require_ready()?;
        let mut kernels = self.discover_kernels_nonempty()?;
        kernel::sort_kernels(&mut kernels);
        let Some(target) = kernel::find_kernel(&kernels, name) else {
            error!("No kernel named {}", name);
            return Err(Error::NoMatchingKernel(name.to_string()));
        };

        let mount = if self.needs_mount() {
            Some(self.mount_boot()?)
        } else {
            None
        };

        let result = self
            .sync_initrds_freestanding()
            .and_then(|()| self.install_and_flush(&kernels, Some(target)));

        if let Some(BootMount::Mounted(dir)) = mount {
            self.umount_boot(&dir);
        }
        result
    }

    /// Remove the kernel named `<type>.<version>-<release>`: its blobs on the
    /// boot target and its files in the kernel directory. The configuration
    /// is regenerated from the remaining kernels, keeping the current default
    /// when it survives.
    ///
    /// The running kernel and the last remaining kernel are never removed.
    pub fn remove_kernel_by_name(&mut self, name: &str) -> Result<()> {
        self.require_ready()?;
        let mut kernels = self.discover_kernels_nonempty()?;
        kernel::sort_kernels(&mut kernels);
        let Some(index) = kernel::find_kernel(&kernels, name)
            .and_then(|k| kernels.iter().position(|other| other.same_identity(k)))
        else {
            error!("No kernel named {}", name);
            return Err(Error::NoMatchingKernel(name.to_string()));
        };
        if !self.image_mode && self.is_running(&kernels[index]) {
            error!("Not removing running kernel {}", name);
            return Err(Error::KernelInUse(name.to_string()));
        }
        if kernels.len() == 1 {
            error!("Not removing {}, no other kernel is installed", name);
            return Err(Error::LastKernel(name.to_string()));
        }

        let mount = if self.needs_mount() {
            Some(self.mount_boot()?)
        } else {
            None
        };

        let target = kernels.remove(index);
        let result = self.remove_and_flush(&target, &kernels);

        if let Some(BootMount::Mounted(dir)) = mount {
            self.umount_boot(&dir);
        }
        result
    }

    fn remove_and_flush(&mut self, target: &Kernel, remaining: &[Kernel]) -> Result<()> {
        let mut all = remaining.to_vec();
        all.push(target.clone());
        let current = self.with_loader(&all, |loader, ctx| Ok(loader.get_default_kernel(ctx)))?;

        self.remove_kernel(target)?;
        for path in target.source_files() {
            if files::remove_if_exists(&path)? {
                info!("Removed {}", path.display());
            }
        }

        // Drop anything the backend still has queued for the removed kernel
        let boot_dir = self
            .boot_dir()
            .ok_or(Error::InsaneConfig("missing config"))?;
        self.set_boot_dir(&boot_dir)?;

        let default = current
            .and_then(|path| remaining.iter().find(|k| k.legacy_path == path))
            .or_else(|| self.pick_default(remaining));
        if let Some(k) = default {
            info!("Default kernel: {}", k.legacy_path);
        }
        self.sync_initrds_freestanding()?;
        self.install_and_flush(remaining, default)
    }

    fn is_running(&self, kernel: &Kernel) -> bool {
        self.system_kernel().is_some_and(|running| {
            running.ktype == kernel.ktype
                && running.version == kernel.version
                && running.release == kernel.release
        })
    }

    /// Newest kernel of the running kernel's type, else newest overall.
    /// `kernels` must already be sorted newest first.
    fn pick_default<'k>(&self, kernels: &'k [Kernel]) -> Option<&'k Kernel> {
        self.system_kernel()
            .and_then(|running| kernels.iter().find(|k| k.ktype == running.ktype))
            .or_else(|| kernels.first())
    }
}
