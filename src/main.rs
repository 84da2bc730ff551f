//! bootman - boot partition manager.
//!
//! Installs kernels from a root's kernel directory onto its boot partition,
//! picks a bootloader the firmware can start, and keeps its configuration
//! in sync.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use bootman::config::Config;

#[derive(Parser)]
#[command(name = "bootman")]
#[command(about = "Kernel and bootloader manager")]
#[command(
    after_help = "QUICK START:\n  bootman preflight     Check the host and root\n  bootman update        Install kernels and the bootloader\n  bootman list-kernels  Show installed kernels"
)]
struct Cli {
    /// Root filesystem to manage
    #[arg(short, long, global = true, default_value = "/")]
    path: PathBuf,

    /// Operate on an image rather than the running system
    #[arg(short, long, global = true)]
    image: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install kernels, freestanding initrds and the bootloader
    Update,

    /// List kernels, newest first (* marks the default)
    ListKernels,

    /// Make a kernel the default (<type>.<version>-<release>)
    SetKernel { name: String },

    /// Remove a kernel from the root and the boot partition (<type>.<version>-<release>)
    RemoveKernel { name: String },

    /// Mount the boot partition and leave it mounted
    MountBoot,

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (verify host tools and root before updating)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the inspected root and selected bootloader
    System,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = Config::load(&cli.path.join("etc/bootman"));
    let prefix = cli.path.as_path();

    match cli.command {
        Commands::Update => {
            commands::cmd_update(prefix, cli.image, &config)?;
        }

        Commands::ListKernels => {
            commands::cmd_list_kernels(prefix, cli.image, &config)?;
        }

        Commands::SetKernel { name } => {
            commands::cmd_set_kernel(prefix, cli.image, &config, &name)?;
        }

        Commands::RemoveKernel { name } => {
            commands::cmd_remove_kernel(prefix, cli.image, &config, &name)?;
        }

        Commands::MountBoot => {
            commands::cmd_mount_boot(prefix, &config)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::System => commands::show::ShowTarget::System,
            };
            commands::cmd_show(prefix, cli.image, show_target, &config)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(prefix, &config, strict)?;
        }
    }

    Ok(())
}
