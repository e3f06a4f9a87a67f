//! External tool detection.

use serde::Serialize;
use std::path::PathBuf;
use std::process::Command;

/// Availability of an external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line printed by the version check.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Check if a tool is available using `--version`.
///
/// # Example
///
/// ```no_run
/// use planet_dumper_exec::check_tool;
///
/// let info = check_tool("pg_dump");
/// if info.available {
///     println!("pg_dump version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(name: &str) -> ToolInfo {
    check_tool_with_arg(name, "--version")
}

/// Check if a tool is available by running it with a custom argument.
pub fn check_tool_with_arg(name: &str, version_arg: &str) -> ToolInfo {
    match Command::new(name).arg(version_arg).output() {
        Ok(output) if output.status.success() => {
            // Some tools print their banner on stderr.
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let version = stdout
                .lines()
                .chain(stderr.lines())
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string);

            ToolInfo {
                name: name.to_string(),
                available: true,
                version,
                path: which::which(name).ok(),
            }
        }
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Check the primary dump, conversion and info tools.
pub fn check_tools(primary: &str, conversion: &str, info: &str) -> Vec<ToolInfo> {
    vec![
        check_tool(primary),
        check_tool_with_arg(conversion, "--help"),
        check_tool(info),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tool_not_found() {
        let info = check_tool("nonexistent_tool_12345");
        assert!(!info.available);
        assert!(info.version.is_none());
        assert!(info.path.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_check_tool_found() {
        let info = check_tool_with_arg("true", "--version");
        assert!(info.available);
        assert!(info.path.is_some());
    }

    #[test]
    fn test_check_tools_reports_all_three() {
        let infos = check_tools("missing_a_12345", "missing_b_12345", "missing_c_12345");
        let names: Vec<_> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["missing_a_12345", "missing_b_12345", "missing_c_12345"]);
        assert!(infos.iter().all(|i| !i.available));
    }
}
