//! Machine identity resolution
//!
//! The identity is a printable token that is stable for a given machine and
//! OS install. It is produced by the first source in an ordered chain that
//! has an answer:
//!
//! 1. the OS-maintained machine id file (`/etc/machine-id`), used verbatim;
//! 2. a SHA-256 fingerprint over the baseboard, processor and disk serials.
//!
//! A source that is merely unavailable hands over to the next one. A source
//! that fails aborts resolution, and every error leaving this module is
//! fatal.
//!
//! Known weakness: most x86 processors no longer expose a serial number, so
//! the processor part of the fingerprint is usually empty. The fingerprint
//! stays deterministic but only the board and disk serials discriminate
//! between machines.

use crate::command::CommandRunner;
use crate::diagnostics::Diagnostics;
use crate::error::{ErrorCategory, ErrorKind, MessError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// OS-maintained persistent machine identifier
pub const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Processor information pseudo-file
pub const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Disk whose serial number feeds the fingerprint
pub const DISK_DEVICE: &str = "/dev/sda";

/// Joins the three hardware serials before hashing
const FIELD_SEPARATOR: &str = " -- ";

/// Only platform with identity sources
const SUPPORTED_OS: &str = "linux";

/// Deterministic per-machine token, used as the file cipher password
#[derive(Clone, PartialEq, Eq)]
pub struct MachineIdentity(Zeroizing<String>);

impl MachineIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MachineIdentity(..)")
    }
}

/// Where the resolver looks for its inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub machine_id_path: PathBuf,
    pub cpuinfo_path: PathBuf,
    pub disk_device: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            machine_id_path: PathBuf::from(MACHINE_ID_PATH),
            cpuinfo_path: PathBuf::from(CPUINFO_PATH),
            disk_device: DISK_DEVICE.to_string(),
        }
    }
}

/// One entry in the identity fallback chain
pub trait IdentitySource {
    /// Short human-readable name used in diagnostics.
    fn name(&self) -> &str;

    /// Returns `Ok(None)` when the source is unavailable on this machine and
    /// the next source should be tried.
    fn lookup(&self, diag: &dyn Diagnostics) -> Result<Option<MachineIdentity>>;
}

/// Reads the OS machine id file
pub struct MachineIdFile {
    path: PathBuf,
}

impl MachineIdFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentitySource for MachineIdFile {
    fn name(&self) -> &str {
        "machine id file"
    }

    fn lookup(&self, diag: &dyn Diagnostics) -> Result<Option<MachineIdentity>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                diag.warn(&format!(
                    "{} not found. Falling back to hardware methods.",
                    self.path.display()
                ));
                return Ok(None);
            }
            Err(e) => {
                return Err(MessError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to read {}", self.path.display()),
                    e,
                ));
            }
        };

        let machine_id = contents.trim();
        if machine_id.is_empty() {
            diag.warn(&format!(
                "{} is empty. Falling back to hardware methods.",
                self.path.display()
            ));
            return Ok(None);
        }

        diag.info(&format!("Using {}", self.path.display()));
        Ok(Some(MachineIdentity::new(machine_id)))
    }
}

/// Hashes baseboard, processor and disk serials together
pub struct HardwareFingerprint<'a> {
    runner: &'a dyn CommandRunner,
    cpuinfo_path: PathBuf,
    disk_device: String,
}

impl<'a> HardwareFingerprint<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        cpuinfo_path: impl Into<PathBuf>,
        disk_device: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            cpuinfo_path: cpuinfo_path.into(),
            disk_device: disk_device.into(),
        }
    }
}

impl IdentitySource for HardwareFingerprint<'_> {
    fn name(&self) -> &str {
        "hardware fingerprint"
    }

    fn lookup(&self, diag: &dyn Diagnostics) -> Result<Option<MachineIdentity>> {
        let board = board_serial(self.runner)?;
        let cpu = processor_serial(&self.cpuinfo_path)?;
        if cpu.is_empty() {
            diag.warn("processor exposes no serial number; fingerprint relies on board and disk");
        }
        let disk = disk_serial(self.runner, &self.disk_device)?;

        let machine_id = fingerprint(&board, &cpu, &disk);
        diag.warn(&machine_id);
        Ok(Some(MachineIdentity::new(machine_id)))
    }
}

/// Query the baseboard serial number through `dmidecode`
pub fn board_serial(runner: &dyn CommandRunner) -> Result<String> {
    let output = runner.run_privileged("dmidecode", &["-s", "baseboard-serial-number"])?;
    Ok(output.stdout.trim().to_string())
}

/// Read the processor serial number from a cpuinfo file
pub fn processor_serial(cpuinfo_path: &Path) -> Result<String> {
    let cpuinfo = fs::read_to_string(cpuinfo_path).map_err(|e| {
        MessError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to read {}", cpuinfo_path.display()),
            e,
        )
    })?;
    Ok(parse_processor_serial(&cpuinfo))
}

/// Extract the third field of every `Serial` line
///
/// A `Serial` line with fewer than three fields contributes an empty line.
/// Hardware without the legacy field yields an empty string, not an error.
pub fn parse_processor_serial(cpuinfo: &str) -> String {
    cpuinfo
        .lines()
        .filter(|line| line.contains("Serial"))
        .map(|line| line.split_whitespace().nth(2).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Query the serial number of `device` through `hdparm`
pub fn disk_serial(runner: &dyn CommandRunner, device: &str) -> Result<String> {
    let output = runner.run_privileged("hdparm", &["-I", device])?;
    parse_disk_serial(&output.stdout).ok_or_else(|| {
        MessError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::SerialNotFound,
            "Serial Number not found in hdparm output.",
        )
    })
}

pub fn parse_disk_serial(hdparm_output: &str) -> Option<String> {
    hdparm_output
        .lines()
        .find(|line| line.contains("Serial Number"))
        .and_then(|line| line.split(':').next_back())
        .map(|serial| serial.trim().to_string())
}

/// Lowercase hex SHA-256 over `board -- cpu -- disk`
pub fn fingerprint(board: &str, cpu: &str, disk: &str) -> String {
    let composite = [board, cpu, disk].join(FIELD_SEPARATOR);
    hex::encode(Sha256::digest(composite.as_bytes()))
}

/// Fail unless `os` (as in `std::env::consts::OS`) has identity sources
pub fn ensure_supported_platform(os: &str) -> Result<()> {
    if os != SUPPORTED_OS {
        return Err(MessError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsupportedPlatform,
            format!("OS not supported: {os}"),
        )
        .into_fatal());
    }
    Ok(())
}

/// Walk `sources` in order and return the first identity found
///
/// Sources after the first one that answers are never consulted.
pub fn resolve_from(
    sources: &[&dyn IdentitySource],
    diag: &dyn Diagnostics,
) -> Result<MachineIdentity> {
    for source in sources {
        diag.debug(&format!("probing {}", source.name()));
        if let Some(identity) = source.lookup(diag).map_err(MessError::into_fatal)? {
            return Ok(identity);
        }
    }
    Err(MessError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::NoIdentitySource,
        "no identity source is available on this machine",
    )
    .into_fatal())
}

/// Resolve the identity of the running machine
pub fn resolve_identity(
    config: &ResolverConfig,
    runner: &dyn CommandRunner,
    diag: &dyn Diagnostics,
) -> Result<MachineIdentity> {
    ensure_supported_platform(std::env::consts::OS)?;

    let machine_id = MachineIdFile::new(&config.machine_id_path);
    let hardware = HardwareFingerprint::new(runner, &config.cpuinfo_path, &config.disk_device);
    let sources: [&dyn IdentitySource; 2] = [&machine_id, &hardware];
    resolve_from(&sources, diag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Privilege, ScriptedCommandRunner};
    use crate::diagnostics::{Level, RecordingDiagnostics};
    use std::cell::Cell;
    use tempfile::TempDir;

    const HDPARM_OUTPUT: &str = "\n/dev/sda:\n\nATA device, with non-removable media\n\tModel Number:       WDC WD10EZEX-08WN4A0\n\tSerial Number:      WD-WCC4E1234567\n\tFirmware Revision:  01.01A01\n";

    const CPUINFO_WITH_SERIAL: &str = "processor\t: 0\nmodel name\t: ARMv7 Processor rev 4 (v7l)\nHardware\t: BCM2835\nRevision\t: a02082\nSerial\t\t: 00000000a1b2c3d4\nModel\t\t: Raspberry Pi 3 Model B Rev 1.2\n";

    const CPUINFO_WITHOUT_SERIAL: &str = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7-8550U CPU @ 1.80GHz\n";

    fn hardware_runner() -> ScriptedCommandRunner {
        ScriptedCommandRunner::new()
            .succeed("dmidecode -s baseboard-serial-number", "BSN-4711\n")
            .succeed("hdparm -I /dev/sda", HDPARM_OUTPUT)
    }

    fn config_in(dir: &TempDir, cpuinfo: &str) -> ResolverConfig {
        let cpuinfo_path = dir.path().join("cpuinfo");
        fs::write(&cpuinfo_path, cpuinfo).unwrap();
        ResolverConfig {
            machine_id_path: dir.path().join("machine-id"),
            cpuinfo_path,
            disk_device: DISK_DEVICE.to_string(),
        }
    }

    struct CountingSource {
        answer: Option<&'static str>,
        lookups: Cell<usize>,
    }

    impl CountingSource {
        fn new(answer: Option<&'static str>) -> Self {
            Self {
                answer,
                lookups: Cell::new(0),
            }
        }
    }

    impl IdentitySource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn lookup(&self, _diag: &dyn Diagnostics) -> Result<Option<MachineIdentity>> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(self.answer.map(MachineIdentity::new))
        }
    }

    struct FailingSource;

    impl IdentitySource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn lookup(&self, _diag: &dyn Diagnostics) -> Result<Option<MachineIdentity>> {
            Err(MessError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::ToolFailed,
                "simulated error",
            ))
        }
    }

    #[test]
    fn test_parse_processor_serial() {
        assert_eq!(parse_processor_serial(CPUINFO_WITH_SERIAL), "00000000a1b2c3d4");
    }

    #[test]
    fn test_parse_processor_serial_missing_is_empty() {
        assert_eq!(parse_processor_serial(CPUINFO_WITHOUT_SERIAL), "");
        assert_eq!(parse_processor_serial(""), "");
    }

    #[test]
    fn test_parse_processor_serial_keeps_short_serial_lines() {
        assert_eq!(
            parse_processor_serial("Serial : AAA\nSerial\nSerial : BBB\n"),
            "AAA\n\nBBB"
        );
        assert_eq!(parse_processor_serial("Serial\nSerial : AAA\n"), "AAA");
    }

    #[test]
    fn test_parse_disk_serial() {
        assert_eq!(
            parse_disk_serial(HDPARM_OUTPUT).as_deref(),
            Some("WD-WCC4E1234567")
        );
        assert_eq!(parse_disk_serial("Model Number: foo\n"), None);
    }

    #[test]
    fn test_fingerprint_known_values() {
        assert_eq!(
            fingerprint("BSN-4711", "00000000a1b2c3d4", "WD-WCC4E1234567"),
            "5b83229ae0254bbbdf3650769f36fd03e00cbe7bd03d0894a920e3cea1a0c239"
        );
        assert_eq!(
            fingerprint("BSN-4711", "", "WD-WCC4E1234567"),
            "53c9b11bb548a051afd149f12188669498117e6eae0ef9c014cf1babbf9f3162"
        );
    }

    #[test]
    fn test_unsupported_platform_is_fatal() {
        let err = ensure_supported_platform("windows").unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedPlatform));
        assert!(err.is_fatal());
        assert_eq!(err.message(), "OS not supported: windows");
        assert!(ensure_supported_platform("linux").is_ok());
    }

    #[test]
    fn test_machine_id_file_is_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("machine-id");
        fs::write(&path, "4c4c4544004d3510804bb4c04f4d3732\n").unwrap();

        let diag = RecordingDiagnostics::new();
        let identity = MachineIdFile::new(&path).lookup(&diag).unwrap().unwrap();
        assert_eq!(identity.as_str(), "4c4c4544004d3510804bb4c04f4d3732");
        assert!(diag.contains(Level::Info, "Using"));
    }

    #[test]
    fn test_machine_id_file_missing_or_empty_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("machine-id");
        let diag = RecordingDiagnostics::new();

        assert!(MachineIdFile::new(&path).lookup(&diag).unwrap().is_none());
        assert!(diag.contains(Level::Warn, "Falling back to hardware methods"));

        fs::write(&path, " \n").unwrap();
        assert!(MachineIdFile::new(&path).lookup(&diag).unwrap().is_none());
    }

    #[test]
    fn test_first_available_source_wins() {
        let unavailable = CountingSource::new(None);
        let first = CountingSource::new(Some("first"));
        let second = CountingSource::new(Some("second"));
        let diag = RecordingDiagnostics::new();

        let sources: [&dyn IdentitySource; 3] = [&unavailable, &first, &second];
        let identity = resolve_from(&sources, &diag).unwrap();

        assert_eq!(identity.as_str(), "first");
        assert_eq!(unavailable.lookups.get(), 1);
        assert_eq!(first.lookups.get(), 1);
        assert_eq!(second.lookups.get(), 0);
    }

    #[test]
    fn test_source_failure_stops_the_chain() {
        let later = CountingSource::new(Some("never"));
        let diag = RecordingDiagnostics::new();

        let sources: [&dyn IdentitySource; 2] = [&FailingSource, &later];
        let err = resolve_from(&sources, &diag).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.kind, Some(ErrorKind::ToolFailed));
        assert_eq!(later.lookups.get(), 0);
    }

    #[test]
    fn test_no_sources_available() {
        let diag = RecordingDiagnostics::new();
        let unavailable = CountingSource::new(None);
        let err = resolve_from(&[&unavailable], &diag).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::NoIdentitySource));
        assert!(err.is_fatal());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_machine_id_short_circuits_hardware() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, CPUINFO_WITH_SERIAL);
        fs::write(&config.machine_id_path, "abcdef0123456789\n").unwrap();
        let runner = hardware_runner();
        let diag = RecordingDiagnostics::new();

        let identity = resolve_identity(&config, &runner, &diag).unwrap();

        assert_eq!(identity.as_str(), "abcdef0123456789");
        assert!(runner.calls().is_empty());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_hardware_fallback_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, CPUINFO_WITH_SERIAL);
        let runner = hardware_runner();
        let diag = RecordingDiagnostics::new();

        let first = resolve_identity(&config, &runner, &diag).unwrap();
        let second = resolve_identity(&config, &runner, &diag).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.as_str(),
            "5b83229ae0254bbbdf3650769f36fd03e00cbe7bd03d0894a920e3cea1a0c239"
        );
        assert!(runner.calls().iter().all(|(p, _)| *p == Privilege::Elevated));
        assert!(diag.contains(Level::Warn, first.as_str()));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_hardware_fallback_accepts_missing_cpu_serial() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, CPUINFO_WITHOUT_SERIAL);
        let runner = hardware_runner();
        let diag = RecordingDiagnostics::new();

        let identity = resolve_identity(&config, &runner, &diag).unwrap();

        assert_eq!(
            identity.as_str(),
            "53c9b11bb548a051afd149f12188669498117e6eae0ef9c014cf1babbf9f3162"
        );
        assert!(diag.contains(Level::Warn, "no serial number"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_board_query_failure_surfaces_tool_text() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, CPUINFO_WITH_SERIAL);
        let runner = ScriptedCommandRunner::new()
            .fail(
                "dmidecode -s baseboard-serial-number",
                1,
                "/sys/firmware/dmi/tables/smbios_entry_point: Permission denied",
            )
            .succeed("hdparm -I /dev/sda", HDPARM_OUTPUT);
        let diag = RecordingDiagnostics::new();

        let err = resolve_identity(&config, &runner, &diag).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.kind, Some(ErrorKind::ToolFailed));
        assert_eq!(
            err.message(),
            "/sys/firmware/dmi/tables/smbios_entry_point: Permission denied"
        );
        // No partial identity: the disk is never queried.
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_missing_disk_serial_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, CPUINFO_WITH_SERIAL);
        let runner = ScriptedCommandRunner::new()
            .succeed("dmidecode -s baseboard-serial-number", "BSN-4711\n")
            .succeed("hdparm -I /dev/sda", "\n/dev/sda:\n");
        let diag = RecordingDiagnostics::new();

        let err = resolve_identity(&config, &runner, &diag).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.kind, Some(ErrorKind::SerialNotFound));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_missing_tool_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir, CPUINFO_WITH_SERIAL);
        let runner = ScriptedCommandRunner::new();
        let diag = RecordingDiagnostics::new();

        let err = resolve_identity(&config, &runner, &diag).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.kind, Some(ErrorKind::ToolMissing));
    }
}
