//! Configuration management for bootman.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Kernel directory, relative to the root prefix.
pub const DEFAULT_KERNEL_DIR: &str = "usr/lib/kernel";
/// Freestanding initrd directory, relative to the root prefix.
pub const DEFAULT_INITRD_DIR: &str = "usr/lib/initrd.d";
/// Boot subpath appended to the root prefix.
pub const DEFAULT_BOOT_DIR: &str = "/boot";
/// Kernel namespace and ESP vendor directory.
pub const DEFAULT_VENDOR_PREFIX: &str = "org.clearlinux";
pub const DEFAULT_SYSFS: &str = "/sys";
pub const DEFAULT_DEVFS: &str = "/dev";

/// Bootman configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Kernel directory relative to the prefix (default: usr/lib/kernel)
    pub kernel_dir: PathBuf,
    /// Freestanding initrd directory relative to the prefix
    pub initrd_dir: PathBuf,
    /// Boot directory subpath (default: /boot)
    pub boot_dir: String,
    /// Vendor prefix used in kernel names and on the ESP
    pub vendor_prefix: String,
    /// Root of the virtual firmware filesystem (default: /sys)
    pub sysfs: PathBuf,
    /// Device filesystem root (default: /dev)
    pub devfs: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernel_dir: PathBuf::from(DEFAULT_KERNEL_DIR),
            initrd_dir: PathBuf::from(DEFAULT_INITRD_DIR),
            boot_dir: DEFAULT_BOOT_DIR.to_string(),
            vendor_prefix: DEFAULT_VENDOR_PREFIX.to_string(),
            sysfs: PathBuf::from(DEFAULT_SYSFS),
            devfs: PathBuf::from(DEFAULT_DEVFS),
        }
    }
}

impl Config {
    /// Load configuration from .env file and environment.
    ///
    /// The .env file is looked up in `base_dir`. A missing or unreadable file
    /// is not an error; defaults apply.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if let Ok(iter) = dotenvy::from_path_iter(&env_path) {
            for (key, value) in iter.flatten() {
                env_vars.insert(key, value);
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(&env_vars)
    }

    /// Build a configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let relative = |key: &str, default: PathBuf| {
            vars.get(key)
                .map(|s| PathBuf::from(s.trim_start_matches('/')))
                .unwrap_or(default)
        };

        Self {
            kernel_dir: relative("BOOTMAN_KERNEL_DIR", defaults.kernel_dir),
            initrd_dir: relative("BOOTMAN_INITRD_DIR", defaults.initrd_dir),
            boot_dir: vars
                .get("BOOTMAN_BOOT_DIR")
                .map(|s| format!("/{}", s.trim_matches('/')))
                .unwrap_or(defaults.boot_dir),
            vendor_prefix: vars
                .get("BOOTMAN_VENDOR_PREFIX")
                .cloned()
                .unwrap_or(defaults.vendor_prefix),
            sysfs: vars
                .get("BOOTMAN_SYSFS")
                .map(PathBuf::from)
                .unwrap_or(defaults.sysfs),
            devfs: vars
                .get("BOOTMAN_DEVFS")
                .map(PathBuf::from)
                .unwrap_or(defaults.devfs),
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  BOOTMAN_KERNEL_DIR: {}", self.kernel_dir.display());
        println!("  BOOTMAN_INITRD_DIR: {}", self.initrd_dir.display());
        println!("  BOOTMAN_BOOT_DIR: {}", self.boot_dir);
        println!("  BOOTMAN_VENDOR_PREFIX: {}", self.vendor_prefix);
        println!("  BOOTMAN_SYSFS: {}", self.sysfs.display());
        println!("  BOOTMAN_DEVFS: {}", self.devfs.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_vars() {
        let config = Config::from_vars(&HashMap::new());
        assert_eq!(config, Config::default());
        assert_eq!(config.boot_dir, "/boot");
        assert_eq!(config.kernel_dir, PathBuf::from("usr/lib/kernel"));
    }

    #[test]
    fn test_overrides_are_normalised() {
        let mut vars = HashMap::new();
        vars.insert("BOOTMAN_KERNEL_DIR".to_string(), "/lib/kernel".to_string());
        vars.insert("BOOTMAN_BOOT_DIR".to_string(), "efi/".to_string());
        vars.insert("BOOTMAN_VENDOR_PREFIX".to_string(), "org.example".to_string());

        let config = Config::from_vars(&vars);
        assert_eq!(config.kernel_dir, PathBuf::from("lib/kernel"));
        assert_eq!(config.boot_dir, "/efi");
        assert_eq!(config.vendor_prefix, "org.example");
    }

    #[test]
    fn test_load_reads_dotenv() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "# comment\nBOOTMAN_INITRD_DIR=\"opt/initrd\"\n",
        )
        .unwrap();

        let config = Config::load(dir.path());
        if std::env::var("BOOTMAN_INITRD_DIR").is_err() {
            assert_eq!(config.initrd_dir, PathBuf::from("opt/initrd"));
        }
    }
}
