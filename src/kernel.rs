//! Kernel discovery.
//!
//! Kernels live in the kernel directory of the root, named
//! `<namespace>.<type>.<version>-<release>`, with optional companions:
//! - `cmdline-<version>-<release>.<type>` - command line fragment, appended to
//!   the global one from [`crate::cmdline`]
//! - `initrd-<namespace>.<type>.<version>-<release>` - the kernel's own initrd

use log::debug;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::cmdline;
use crate::config::Config;
use crate::error::{IoContext, Result};

/// A discovered kernel. Identity is (`ktype`, `version`, `release`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Kernel {
    pub ktype: String,
    pub version: String,
    pub release: u32,
    /// Where the kernel blob currently lives.
    pub source: PathBuf,
    /// The kernel's own initrd in the kernel directory.
    pub initrd_source: Option<PathBuf>,
    /// Installed kernel path, relative to the boot target.
    pub legacy_path: String,
    /// Installed initrd path, relative to the boot target.
    pub initrd_path: Option<String>,
    /// Command line fragment.
    pub cmdline: String,
}

impl Kernel {
    /// Same (type, version, release) triple.
    pub fn same_identity(&self, other: &Kernel) -> bool {
        self.ktype == other.ktype && self.version == other.version && self.release == other.release
    }

    /// Short name used on the command line: `<type>.<version>-<release>`.
    pub fn name(&self) -> String {
        format!("{}.{}-{}", self.ktype, self.version, self.release)
    }

    /// Everything in the kernel directory that belongs to this kernel.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.source.clone()];
        files.extend(self.initrd_source.clone());
        if let Some(dir) = self.source.parent() {
            files.push(dir.join(cmdline_file_name(&self.ktype, &self.version, self.release)));
        }
        files
    }
}

/// Name of the per-kernel command line file.
pub fn cmdline_file_name(ktype: &str, version: &str, release: u32) -> String {
    format!("cmdline-{}-{}.{}", version, release, ktype)
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.legacy_path)
    }
}

/// Split `<type>.<version>-<release>` into its parts.
pub fn parse_kernel_name(name: &str) -> Option<(String, String, u32)> {
    let (ktype, rest) = name.split_once('.')?;
    let (version, release) = rest.rsplit_once('-')?;
    if ktype.is_empty() || version.is_empty() {
        return None;
    }
    let release = release.parse().ok()?;
    Some((ktype.to_string(), version.to_string(), release))
}

/// Parse a kernel blob filename in the given namespace.
pub fn parse_kernel_filename(namespace: &str, filename: &str) -> Option<(String, String, u32)> {
    let name = filename.strip_prefix(namespace)?.strip_prefix('.')?;
    parse_kernel_name(name)
}

/// Discover all kernels under `<prefix>/<kernel_dir>`.
///
/// A missing kernel directory yields an empty list.
pub fn discover_kernels(prefix: &Path, config: &Config) -> Result<Vec<Kernel>> {
    let kernel_dir = prefix.join(&config.kernel_dir);
    let entries = match fs::read_dir(&kernel_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Kernel directory {} does not exist", kernel_dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e).io_context(|| format!("Failed to read {}", kernel_dir.display()))
        }
    };

    let global_cmdline = cmdline::global_cmdline(prefix);
    let removals = cmdline::removals(prefix);
    let namespace = &config.vendor_prefix;
    let mut kernels = Vec::new();

    for entry in entries {
        let entry = entry.io_context(|| format!("Failed to read {}", kernel_dir.display()))?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        let Some((ktype, version, release)) = parse_kernel_filename(namespace, &filename) else {
            continue;
        };
        let source = entry.path();
        if !source.is_file() {
            continue;
        }

        let initrd_name = format!("initrd-{}", filename);
        let initrd_source = kernel_dir.join(&initrd_name);
        let (initrd_source, initrd_path) = if initrd_source.is_file() {
            (Some(initrd_source), Some(initrd_name))
        } else {
            (None, None)
        };

        let own_cmdline = cmdline::read_cmdline(
            &kernel_dir.join(cmdline_file_name(&ktype, &version, release)),
        );
        let merged = cmdline::join_fragments([
            global_cmdline.as_str(),
            own_cmdline.as_deref().unwrap_or(""),
        ]);

        debug!("Discovered kernel {}", filename);
        kernels.push(Kernel {
            ktype,
            version,
            release,
            source,
            initrd_source,
            legacy_path: filename,
            initrd_path,
            cmdline: cmdline::apply_removals(&merged, &removals),
        });
    }

    Ok(kernels)
}

/// Sort descending by release number.
pub fn sort_kernels(kernels: &mut [Kernel]) {
    kernels.sort_by(|a, b| match b.release.cmp(&a.release) {
        Ordering::Equal => a.legacy_path.cmp(&b.legacy_path),
        other => other,
    });
}

/// Find a kernel by its `<type>.<version>-<release>` name.
pub fn find_kernel<'a>(kernels: &'a [Kernel], name: &str) -> Option<&'a Kernel> {
    let (ktype, version, release) = parse_kernel_name(name)?;
    kernels
        .iter()
        .find(|k| k.ktype == ktype && k.version == version && k.release == release)
}
