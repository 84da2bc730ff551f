//! GRUB2: kept only where a system already boots with it.
//!
//! GRUB2 scans the boot directory itself, so kernel queue operations are
//! no-ops and the configuration is regenerated with `grub-mkconfig`.

use log::{debug, info};
use std::path::PathBuf;

use super::{BootContext, Bootloader};
use crate::caps::Capabilities;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::process::{self, Cmd};

pub const GRUB_MKCONFIG: &str = "usr/sbin/grub-mkconfig";
pub const GRUB_CFG: &str = "grub/grub.cfg";

#[derive(Debug, Default)]
pub struct Grub2 {
    config_path: Option<PathBuf>,
}

impl Grub2 {
    pub fn new() -> Self {
        Self::default()
    }

    fn mkconfig(&self, ctx: &BootContext<'_>) -> Result<()> {
        let config_path = self
            .config_path
            .as_ref()
            .ok_or(Error::BootloaderInit("grub2"))?;
        let cmd = Cmd::new(ctx.prefix().join(GRUB_MKCONFIG))
            .arg("-o")
            .arg_path(config_path);
        let program = cmd.program().display().to_string();
        let code = ctx.system.run(cmd)?;
        if code != 0 {
            return Err(Error::Command { program, code });
        }
        ctx.system.sync();
        info!("Regenerated {}", config_path.display());
        Ok(())
    }
}

impl Bootloader for Grub2 {
    fn name(&self) -> &'static str {
        "grub2"
    }

    fn init(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        self.config_path = Some(ctx.boot_dir.join(GRUB_CFG));
        Ok(())
    }

    fn install_kernel(&mut self, _ctx: &BootContext<'_>, _kernel: &Kernel) -> Result<()> {
        Ok(())
    }

    fn remove_kernel(&mut self, _ctx: &BootContext<'_>, _kernel: &Kernel) -> Result<()> {
        Ok(())
    }

    fn set_default_kernel(
        &mut self,
        ctx: &BootContext<'_>,
        _kernel: Option<&Kernel>,
    ) -> Result<()> {
        self.mkconfig(ctx)
    }

    fn get_default_kernel(&self, _ctx: &BootContext<'_>) -> Option<String> {
        None
    }

    fn needs_install(&self, _ctx: &BootContext<'_>) -> bool {
        false
    }

    fn needs_update(&self, _ctx: &BootContext<'_>) -> bool {
        false
    }

    fn install(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        self.mkconfig(ctx)
    }

    fn update(&mut self, ctx: &BootContext<'_>) -> Result<()> {
        self.mkconfig(ctx)
    }

    fn remove(&mut self, _ctx: &BootContext<'_>) -> Result<()> {
        Ok(())
    }

    fn destroy(&mut self) {
        self.config_path = None;
    }

    fn capabilities(&self, ctx: &BootContext<'_>) -> Capabilities {
        let mkconfig = ctx.prefix().join(GRUB_MKCONFIG);
        let existing = ctx.boot_dir.join(GRUB_CFG);
        if !process::is_executable(&mkconfig) || !existing.is_file() {
            debug!("grub2 not in use ({})", existing.display());
            return Capabilities::empty();
        }
        Capabilities::GPT | Capabilities::LEGACY | Capabilities::EXTFS | Capabilities::FATFS
    }
}
