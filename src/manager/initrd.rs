//! Freestanding initrds: images not tied to a kernel build, layered on top
//! of every kernel's own initrd.

use log::{debug, error, info};
use std::collections::BTreeMap;
use std::fs;
use std::io;

use super::BootManager;
use crate::bootloader;
use crate::error::{Error, IoContext, Result};
use crate::files;

/// Installed name prefix of freestanding initrds.
pub const FREESTANDING_PREFIX: &str = "freestanding-";

/// Installed name (`freestanding-<file>`) to source file name.
///
/// Ordered so generated configuration is stable across runs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FreestandingInitrds {
    map: BTreeMap<String, String>,
}

impl FreestandingInitrds {
    pub fn insert(&mut self, file_name: &str) {
        self.map.insert(
            format!("{}{}", FREESTANDING_PREFIX, file_name),
            file_name.to_string(),
        );
    }

    /// Installed names, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl BootManager {
    /// Enumerate, copy and prune in one pass, so the boot target holds
    /// exactly the initrds the backend configuration will reference.
    pub fn sync_initrds_freestanding(&mut self) -> Result<()> {
        self.enumerate_initrds_freestanding()?;
        self.copy_initrd_freestanding()?;
        self.remove_initrd_freestanding()?;
        Ok(())
    }

    /// Rebuild the freestanding initrd map from the initrd directory.
    ///
    /// Only non-empty regular files count. A missing directory is not an
    /// error.
    pub fn enumerate_initrds_freestanding(&mut self) -> Result<()> {
        let dir = self
            .initrd_dir()
            .ok_or(Error::InsaneConfig("missing config"))?;
        self.initrds.clear();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("path {} does not exist", dir.display());
                return Ok(());
            }
            Err(e) => {
                error!("Error opening {}: {}", dir.display(), e);
                return Err(e).io_context(|| format!("Failed to open {}", dir.display()));
            }
        };

        for entry in entries {
            let entry = entry.io_context(|| format!("Failed to read {}", dir.display()))?;
            // Broken entries are skipped, symlinks are not followed
            let Ok(meta) = fs::symlink_metadata(entry.path()) else {
                continue;
            };
            if !meta.file_type().is_file() || meta.len() == 0 {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            debug!("Found freestanding initrd {}", name);
            self.initrds.insert(&name);
        }
        Ok(())
    }

    /// Copy every enumerated initrd onto the boot target when its content
    /// differs. Returns the number of files copied.
    pub fn copy_initrd_freestanding(&mut self) -> Result<usize> {
        let source_dir = self
            .initrd_dir()
            .ok_or(Error::InsaneConfig("missing config"))?;
        let initrds = self.initrds.clone();

        self.with_loader(&[], |loader, ctx| {
            let target = bootloader::boot_target(loader, ctx)?;
            let mut copied = 0;
            for (key, name) in initrds.iter() {
                let source = source_dir.join(name);
                let dest = target.join(key);
                if files::copy_if_changed(&source, &dest, 0o644).map_err(|e| {
                    error!("Failed to install initrd {}: {}", dest.display(), e);
                    e
                })? {
                    info!("Installed initrd {}", dest.display());
                    copied += 1;
                }
            }
            Ok(copied)
        })
    }

    /// Remove installed `freestanding-*` files that are no longer in the
    /// enumerated map. Returns the number of files removed.
    pub fn remove_initrd_freestanding(&mut self) -> Result<usize> {
        let initrds = self.initrds.clone();

        self.with_loader(&[], |loader, ctx| {
            let target = bootloader::boot_target(loader, ctx)?;
            let entries = fs::read_dir(&target).map_err(|e| {
                error!("Error opening {}: {}", target.display(), e);
                Error::io(format!("Failed to open {}", target.display()), e)
            })?;

            let mut removed = 0;
            for entry in entries {
                let entry =
                    entry.io_context(|| format!("Failed to read {}", target.display()))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with(FREESTANDING_PREFIX) || initrds.contains_key(&name) {
                    continue;
                }
                if files::remove_if_exists(&entry.path())? {
                    info!("Removed stale initrd {}", entry.path().display());
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_prefixed_and_ordered() {
        let mut initrds = FreestandingInitrds::default();
        initrds.insert("zz.img");
        initrds.insert("aa.img");

        let keys: Vec<&str> = initrds.keys().collect();
        assert_eq!(keys, vec!["freestanding-aa.img", "freestanding-zz.img"]);
        assert!(initrds.contains_key("freestanding-aa.img"));
        assert!(!initrds.contains_key("aa.img"));
        assert_eq!(initrds.len(), 2);
    }
}
