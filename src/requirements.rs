//! System package provisioning
//!
//! The hardware fallback needs `dmidecode` and `hdparm`. On Debian-like
//! systems this step checks for them with `dpkg` and installs whatever is
//! missing with `apt`. A failed install is reported, not retried.

use crate::command::{CommandRunner, ToolError, ToolOutput};
use crate::diagnostics::Diagnostics;
use crate::error::{MessError, Result};

/// Packages providing the hardware query tools
pub const REQUIRED_PACKAGES: [&str; 3] = ["dmidecode", "hdparm", "util-linux"];

/// Outcome of a provisioning pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub already_present: Vec<String>,
    pub installed: Vec<String>,
    pub failed: Vec<String>,
}

impl ProvisionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Whether `package` is installed according to `dpkg -s`
///
/// A missing `dpkg` is fatal; any other failure means "not installed".
pub fn is_installed(runner: &dyn CommandRunner, package: &str) -> Result<bool> {
    match runner.run("dpkg", &["-s", package]) {
        Ok(_) => Ok(true),
        Err(ToolError::Failed { .. }) => Ok(false),
        Err(e) => Err(MessError::from(e).into_fatal()),
    }
}

/// Install `package` with `apt`
///
/// Returns `Ok(false)` if apt ran and failed. Missing `apt` or `sudo` is fatal.
pub fn install_package(
    runner: &dyn CommandRunner,
    package: &str,
    diag: &dyn Diagnostics,
) -> Result<bool> {
    diag.info(&format!("Installing {package}..."));
    match runner.run_privileged("apt", &["install", "-y", package]) {
        Ok(output) => {
            log_tool_output(&output, diag);
            diag.info(&format!("{package} installed successfully!"));
            Ok(true)
        }
        Err(ToolError::Failed { .. }) => {
            diag.error(&format!("Failed to install {package}."));
            Ok(false)
        }
        Err(e) => Err(MessError::from(e).into_fatal()),
    }
}

/// Pass captured tool output on at debug level, one message per stream
fn log_tool_output(output: &ToolOutput, diag: &dyn Diagnostics) {
    for stream in [&output.stdout, &output.stderr] {
        let text = stream.trim();
        if !text.is_empty() {
            diag.debug(text);
        }
    }
}

/// Make sure every package in `packages` is installed
pub fn fulfill_requirements(
    runner: &dyn CommandRunner,
    packages: &[&str],
    diag: &dyn Diagnostics,
) -> Result<ProvisionReport> {
    let mut report = ProvisionReport::default();
    let mut missing = Vec::new();

    for &package in packages {
        if is_installed(runner, package)? {
            report.already_present.push(package.to_string());
        } else {
            missing.push(package);
        }
    }

    if !missing.is_empty() {
        diag.info(&format!("Missing packages detected: {}", missing.join(", ")));
        for package in missing {
            if install_package(runner, package, diag)? {
                report.installed.push(package.to_string());
            } else {
                report.failed.push(package.to_string());
            }
        }
    }

    if report.is_complete() {
        diag.info("All packages acquired.");
    } else {
        diag.warn(&format!(
            "Packages still missing: {}",
            report.failed.join(", ")
        ));
    }
    Ok(report)
}
