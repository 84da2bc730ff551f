//! extlinux backend: kernel queue, configuration flush and MBR install.
//!
//! These drive the backend directly through a `BootContext` so the exact
//! bytes written can be checked.

mod helpers;

use std::fs;
use std::path::PathBuf;

use bootman::bootloader::extlinux::{
    Extlinux, FinalizeMode, CONFIG_FILE, GPTMBR_BIN, LDLINUX_MARKER, MBR_BOOT_CODE_SIZE,
};
use bootman::bootloader::{BootContext, Bootloader};
use bootman::config::Config;
use bootman::kernel::{self, Kernel};
use bootman::manager::FreestandingInitrds;
use bootman::sysconfig::{inspect_root, DeviceProbe, SystemConfig};
use bootman::{Capabilities, Error};
use helpers::*;

struct Fixture {
    pg: Playground,
    config: Config,
    sysconfig: SystemConfig,
    kernels: Vec<Kernel>,
    initrds: FreestandingInitrds,
}

impl Fixture {
    /// Legacy vfat root with kernels native 5.0.0-10 (own initrd, cmdline)
    /// and native 5.0.0-5.
    fn new() -> Self {
        let pg = Playground::legacy("vfat");
        pg.set_probe(DeviceProbe {
            uuid: ROOT_UUID.to_string(),
            part_uuid: Some(ROOT_PARTUUID.to_string()),
            luks_uuid: Some("luks-1234".to_string()),
        });
        pg.add_kernel("native", "5.0.0", 10);
        pg.add_kernel_initrd("native", "5.0.0", 10);
        pg.add_kernel_cmdline("native", "5.0.0", 10, "quiet\n");
        pg.add_kernel("native", "5.0.0", 5);

        let config = pg.config();
        let sysconfig = inspect_root(&pg.root, false, &pg.fake).unwrap();
        let mut kernels = kernel::discover_kernels(&sysconfig.prefix, &config).unwrap();
        kernel::sort_kernels(&mut kernels);

        Self {
            pg,
            config,
            sysconfig,
            kernels,
            initrds: FreestandingInitrds::default(),
        }
    }

    fn ctx(&self) -> BootContext<'_> {
        self.ctx_with(&self.kernels)
    }

    fn ctx_with<'a>(&'a self, kernels: &'a [Kernel]) -> BootContext<'a> {
        BootContext {
            config: &self.config,
            sysconfig: &self.sysconfig,
            boot_dir: self.pg.boot_dir(),
            image_mode: false,
            initrds: &self.initrds,
            kernels,
            system: &self.pg.fake,
        }
    }

    fn loader(&self) -> Extlinux {
        let mut loader = Extlinux::new();
        loader.init(&self.ctx()).unwrap();
        loader
    }

    fn config_path(&self) -> PathBuf {
        self.pg.boot_dir().join(CONFIG_FILE)
    }

    fn read_config(&self) -> String {
        fs::read_to_string(self.config_path()).unwrap()
    }
}

#[test]
fn test_enqueue_is_idempotent() {
    let fx = Fixture::new();
    let mut loader = fx.loader();
    let ctx = fx.ctx();

    loader.install_kernel(&ctx, &fx.kernels[0]).unwrap();
    loader.install_kernel(&ctx, &fx.kernels[0]).unwrap();
    loader.install_kernel(&ctx, &fx.kernels[1]).unwrap();

    assert_eq!(loader.queue().len(), 2);
}

#[test]
fn test_config_with_default() {
    let mut fx = Fixture::new();
    fx.initrds.insert("microcode.img");
    let mut loader = fx.loader();
    let ctx = fx.ctx();

    for k in &fx.kernels {
        loader.install_kernel(&ctx, k).unwrap();
    }
    loader.set_default_kernel(&ctx, Some(&fx.kernels[0])).unwrap();

    let root = format!("root=PARTUUID={} rd.luks.uuid=luks-1234", ROOT_PARTUUID);
    let expected = format!(
        "DEFAULT org.clearlinux.native.5.0.0-10\n\
         LABEL org.clearlinux.native.5.0.0-10\n  \
         KERNEL org.clearlinux.native.5.0.0-10\n  \
         INITRD initrd-org.clearlinux.native.5.0.0-10,freestanding-microcode.img\n\
         APPEND {root} quiet\n\
         LABEL org.clearlinux.native.5.0.0-5\n  \
         KERNEL org.clearlinux.native.5.0.0-5\n  \
         INITRD freestanding-microcode.img\n\
         APPEND {root} \n",
        root = root
    );
    assert_eq!(fx.read_config(), expected);
}

#[test]
fn test_config_without_default_has_timeout() {
    let fx = Fixture::new();
    let mut loader = fx.loader();
    let ctx = fx.ctx();

    loader.install_kernel(&ctx, &fx.kernels[1]).unwrap();
    loader.set_default_kernel(&ctx, None).unwrap();

    let config = fx.read_config();
    assert!(config.starts_with("TIMEOUT 100\n"), "got:\n{}", config);
    assert!(!config.contains("DEFAULT"));
    assert!(config.contains("LABEL org.clearlinux.native.5.0.0-5\n"));
    // No initrds at all: no INITRD line
    assert!(!config.contains("INITRD"));
}

#[test]
fn test_uuid_root_without_partuuid() {
    let mut fx = Fixture::new();
    fx.sysconfig.root_device = Some(DeviceProbe {
        uuid: ROOT_UUID.to_string(),
        part_uuid: None,
        luks_uuid: None,
    });
    let mut loader = fx.loader();
    let ctx = fx.ctx();

    loader.install_kernel(&ctx, &fx.kernels[0]).unwrap();
    loader.set_default_kernel(&ctx, Some(&fx.kernels[0])).unwrap();

    assert_file_contains(
        &fx.config_path(),
        &format!("APPEND root=UUID={} quiet\n", ROOT_UUID),
    );
}

#[test]
fn test_unchanged_config_is_not_rewritten() {
    let fx = Fixture::new();
    let mut loader = fx.loader();
    let ctx = fx.ctx();
    for k in &fx.kernels {
        loader.install_kernel(&ctx, k).unwrap();
    }

    loader.set_default_kernel(&ctx, Some(&fx.kernels[0])).unwrap();
    let first = fx.read_config();
    let syncs = fx.pg.fake.syncs();
    assert!(syncs >= 1);

    loader.set_default_kernel(&ctx, Some(&fx.kernels[0])).unwrap();
    assert_eq!(fx.read_config(), first);
    assert_eq!(fx.pg.fake.syncs(), syncs);

    loader.set_default_kernel(&ctx, Some(&fx.kernels[1])).unwrap();
    assert_ne!(fx.read_config(), first);
    assert_eq!(fx.pg.fake.syncs(), syncs + 1);
}

#[test]
fn test_get_default_reads_back_config() {
    let fx = Fixture::new();
    let mut loader = fx.loader();
    let ctx = fx.ctx();
    assert_eq!(loader.get_default_kernel(&ctx), None);

    for k in &fx.kernels {
        loader.install_kernel(&ctx, k).unwrap();
    }
    loader.set_default_kernel(&ctx, Some(&fx.kernels[1])).unwrap();

    assert_eq!(
        loader.get_default_kernel(&ctx).as_deref(),
        Some("org.clearlinux.native.5.0.0-5")
    );
}

#[test]
fn test_remove_kernel_keeps_entry_until_reinit() {
    let fx = Fixture::new();
    let mut loader = fx.loader();
    let ctx = fx.ctx();
    for k in &fx.kernels {
        loader.install_kernel(&ctx, k).unwrap();
    }

    loader.remove_kernel(&ctx, &fx.kernels[1]).unwrap();
    assert_eq!(loader.queue().len(), 2);
    loader.set_default_kernel(&ctx, Some(&fx.kernels[0])).unwrap();
    assert_file_contains(&fx.config_path(), "LABEL org.clearlinux.native.5.0.0-5\n");

    // A fresh init rebuilds the queue from scratch
    loader.init(&ctx).unwrap();
    assert!(loader.queue().is_empty());
    loader.install_kernel(&ctx, &fx.kernels[0]).unwrap();
    loader.set_default_kernel(&ctx, Some(&fx.kernels[0])).unwrap();
    assert!(!fx.read_config().contains("5.0.0-5"));
}

#[test]
fn test_stale_queue_entry() {
    let fx = Fixture::new();
    let mut loader = fx.loader();
    loader.install_kernel(&fx.ctx(), &fx.kernels[0]).unwrap();

    let err = loader
        .set_default_kernel(&fx.ctx_with(&[]), None)
        .unwrap_err();
    assert!(matches!(err, Error::StaleQueue(_)), "got {:?}", err);
    assert!(!fx.config_path().exists());
}

#[test]
fn test_fresh_install_writes_mbr_and_runs_install() {
    let fx = Fixture::new();
    let mut loader = fx.loader();
    assert_eq!(loader.finalize_mode(), Some(FinalizeMode::Install));

    loader.install(&fx.ctx()).unwrap();

    let disk = fs::read(&fx.pg.disk).unwrap();
    let template = fs::read(fx.pg.root.join(GPTMBR_BIN)).unwrap();
    assert_eq!(&disk[..MBR_BOOT_CODE_SIZE], &template[..MBR_BOOT_CODE_SIZE]);
    // Partition table area is untouched
    assert!(disk[MBR_BOOT_CODE_SIZE..512].iter().all(|b| *b == 0));

    let commands = fx.pg.fake.commands();
    assert_eq!(
        commands,
        vec![vec![
            fx.pg.root.join("usr/bin/extlinux").display().to_string(),
            "-i".to_string(),
            fx.pg.boot_dir().display().to_string(),
        ]]
    );
    assert!(fx.pg.fake.syncs() >= 1);
}

#[test]
fn test_mbr_template_ships_with_extlinux() {
    assert_eq!(GPTMBR_BIN, "usr/share/extlinux/gptmbr.bin");
}

#[test]
fn test_existing_install_is_updated() {
    let fx = Fixture::new();
    fs::write(fx.pg.boot_dir().join(LDLINUX_MARKER), "ldlinux").unwrap();
    let mut loader = fx.loader();
    assert_eq!(loader.finalize_mode(), Some(FinalizeMode::Update));

    loader.update(&fx.ctx()).unwrap();

    let commands = fx.pg.fake.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0][1], "-U");
}

#[test]
fn test_short_template_is_rejected() {
    let fx = Fixture::new();
    fs::write(fx.pg.root.join(GPTMBR_BIN), [0xAAu8; 100]).unwrap();
    let mut loader = fx.loader();

    let err = loader.install(&fx.ctx()).unwrap_err();
    match err {
        Error::ShortWrite {
            expected, written, ..
        } => {
            assert_eq!(expected, MBR_BOOT_CODE_SIZE);
            assert_eq!(written, 100);
        }
        other => panic!("expected ShortWrite, got {:?}", other),
    }
    assert!(fs::read(&fx.pg.disk).unwrap().iter().all(|b| *b == 0));
    assert!(fx.pg.fake.commands().is_empty());
}

#[test]
fn test_failing_extlinux_is_an_error() {
    let fx = Fixture::new();
    fx.pg.fake.state.borrow_mut().exit_code = 1;
    let mut loader = fx.loader();

    let err = loader.install(&fx.ctx()).unwrap_err();
    assert!(matches!(err, Error::Command { code: 1, .. }), "got {:?}", err);
}

#[test]
fn test_always_needs_install_and_update() {
    let fx = Fixture::new();
    let loader = fx.loader();
    assert!(loader.needs_install(&fx.ctx()));
    assert!(loader.needs_update(&fx.ctx()));
}

#[test]
fn test_capabilities_need_binary() {
    let fx = Fixture::new();
    let loader = fx.loader();
    assert!(loader
        .capabilities(&fx.ctx())
        .contains(Capabilities::LEGACY | Capabilities::GPT));

    fs::remove_file(fx.pg.root.join("usr/bin/extlinux")).unwrap();
    assert_eq!(loader.capabilities(&fx.ctx()), Capabilities::empty());
}

#[test]
fn test_destroy_clears_queue() {
    let fx = Fixture::new();
    let mut loader = fx.loader();
    loader.install_kernel(&fx.ctx(), &fx.kernels[0]).unwrap();

    loader.destroy();
    assert!(loader.queue().is_empty());
    assert_eq!(loader.finalize_mode(), None);
    assert!(matches!(
        loader.set_default_kernel(&fx.ctx(), None),
        Err(Error::BootloaderInit("extlinux"))
    ));
}
