//! Kernel command line assembly.
//!
//! The global command line is merged from, in order:
//! 1. `usr/share/kernel/cmdline.d/*.conf`, skipping any file with a
//!    same-named entry under `etc/kernel/cmdline.d`
//! 2. `etc/kernel/cmdline`
//! 3. `etc/kernel/cmdline.d/*.conf`, skipping files that resolve to `/dev/null`
//!
//! Every line of `etc/kernel/cmdline-removal.d/*.conf` is then cut out of the
//! final per-kernel command line.

use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Vendor kernel configuration, relative to the root.
pub const VENDOR_CONF_DIR: &str = "usr/share/kernel";
/// Local kernel configuration, relative to the root.
pub const SYSTEM_CONF_DIR: &str = "etc/kernel";

/// Flatten a command line file: skip blank lines and `#` comments, trim each
/// line, join with single spaces.
pub fn parse_cmdline(content: &str) -> String {
    cmdline_lines(content).collect::<Vec<_>>().join(" ")
}

fn cmdline_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

/// Read and flatten a command line file. Missing files yield `None`.
pub fn read_cmdline(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(parse_cmdline(&content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Unable to open {}: {}", path.display(), e);
            None
        }
    }
}

/// `*.conf` files in `dir`, sorted by name. A missing directory is empty.
fn conf_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Unable to read {}: {}", dir.display(), e);
            }
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "conf"))
        .collect();
    files.sort();
    files
}

fn masked_by(path: &Path, mask_dir: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| fs::symlink_metadata(mask_dir.join(name)).is_ok())
}

fn links_to_dev_null(path: &Path) -> bool {
    fs::canonicalize(path).is_ok_and(|p| p.as_path() == Path::new("/dev/null"))
}

/// Merge the vendor, global and local command line fragments under `prefix`.
pub fn global_cmdline(prefix: &Path) -> String {
    let system_dir = prefix.join(SYSTEM_CONF_DIR);
    let local_d = system_dir.join("cmdline.d");
    let mut parts = Vec::new();

    for path in conf_files(&prefix.join(VENDOR_CONF_DIR).join("cmdline.d")) {
        if masked_by(&path, &local_d) {
            debug!("Skipping masked file: {}", path.display());
            continue;
        }
        parts.extend(read_cmdline(&path));
    }

    parts.extend(read_cmdline(&system_dir.join("cmdline")));

    for path in conf_files(&local_d) {
        if links_to_dev_null(&path) {
            debug!("Skipping disabled cmdline: {}", path.display());
            continue;
        }
        parts.extend(read_cmdline(&path));
    }

    join_fragments(parts.iter().map(String::as_str))
}

/// Options to strip, one per line of each removal file.
pub fn removals(prefix: &Path) -> Vec<String> {
    let dir = prefix.join(SYSTEM_CONF_DIR).join("cmdline-removal.d");
    let mut out = Vec::new();
    for path in conf_files(&dir) {
        debug!("Removing cmdline using file: {}", path.display());
        match fs::read_to_string(&path) {
            Ok(content) => out.extend(cmdline_lines(&content).map(str::to_string)),
            Err(e) => warn!("Unable to open {}: {}", path.display(), e),
        }
    }
    out
}

/// Join non-empty fragments with single spaces.
pub fn join_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    fragments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut each removal out of `cmdline`, first whole-word occurrence only.
pub fn apply_removals(cmdline: &str, removals: &[String]) -> String {
    removals
        .iter()
        .fold(cmdline.trim().to_string(), |acc, option| remove_option(&acc, option))
}

fn remove_option(cmdline: &str, option: &str) -> String {
    if option.is_empty() {
        return cmdline.to_string();
    }
    let bytes = cmdline.as_bytes();
    let mut from = 0;
    while let Some(offset) = cmdline[from..].find(option) {
        let start = from + offset;
        let end = start + option.len();
        let clean_start = start == 0 || bytes[start - 1] == b' ';
        let clean_end = end == bytes.len() || bytes[end] == b' ';
        if clean_start && clean_end {
            return join_fragments([&cmdline[..start], &cmdline[end..]]);
        }
        from = start + cmdline[start..].chars().next().map_or(1, char::len_utf8);
    }
    cmdline.to_string()
}
