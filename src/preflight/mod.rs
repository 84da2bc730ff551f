//! Preflight checks for a bootman run.
//!
//! Verifies host probing tools and the bootloader assets in a root before
//! anything touches the boot partition. Run with `bootman preflight`.

mod environment;
mod host_tools;
mod types;

use std::path::Path;

use anyhow::{bail, Result};

use crate::config::Config;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks against the root at `prefix`.
pub fn run_preflight(prefix: &Path, config: &Config) -> Result<PreflightReport> {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    println!("Checking root {}...", prefix.display());
    checks.extend(environment::check_root(prefix, config));
    checks.extend(environment::check_boot_assets(prefix, config));

    println!();

    Ok(PreflightReport { checks })
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(prefix: &Path, config: &Config) -> Result<()> {
    let report = run_preflight(prefix, config)?;
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before updating.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
