//! Preflight command - runs preflight checks.

use anyhow::Result;
use std::path::Path;

use bootman::config::Config;
use bootman::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(prefix: &Path, config: &Config, strict: bool) -> Result<()> {
    if strict {
        preflight::run_preflight_or_fail(prefix, config)?;
    } else {
        let report = preflight::run_preflight(prefix, config)?;
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to fail with a non-zero exit code.");
        }
    }
    Ok(())
}
