//! Host tool availability checks.

use crate::process;

use super::types::CheckResult;

/// Tools the host system shells out to when probing devices.
const REQUIRED_TOOLS: [(&str, &str, &str); 3] = [
    ("blkid", "util-linux", "Required to read filesystem UUIDs and types"),
    ("lsblk", "util-linux", "Required to resolve parent disks and partition flags"),
    ("findmnt", "util-linux", "Required to find the legacy boot partition"),
];

/// Check host tools are installed.
pub fn check_host_tools() -> Vec<CheckResult> {
    REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose))
        .collect()
}

fn check_tool_exists(tool: &str, package: &str, purpose: &str) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => CheckResult::fail(
            tool,
            &format!("Not found. Install '{}' package. {}", package, purpose),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_result_per_tool() {
        let results = check_host_tools();
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["blkid", "lsblk", "findmnt"]);
    }
}
