//! bootman library: boot partition management for kernels installed into a
//! root filesystem.
//!
//! The binary in `main.rs` is a thin CLI over [`BootManager`]. Everything that
//! touches devices or mounts goes through [`system::System`] so it can be
//! exercised against a playground root in tests.

pub mod bootloader;
pub mod caps;
pub mod cmdline;
pub mod config;
pub mod error;
pub mod files;
pub mod kernel;
pub mod manager;
pub mod preflight;
pub mod process;
pub mod sysconfig;
pub mod system;

pub use caps::Capabilities;
pub use error::{Error, Result};
pub use manager::{BootManager, BootMount};
