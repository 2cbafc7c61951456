//! mess CLI - toggle a file between plaintext and a machine-bound container
//!
//! A file whose name ends in `.mess` is decrypted, anything else is
//! encrypted. The password is the identity of the machine the command runs
//! on, so containers only open where they were made.

use clap::Parser;
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mess::command::SystemCommandRunner;
use mess::diagnostics::TracingDiagnostics;
use mess::error::MessError;
use mess::file_ops::{self, Operation};
use mess::identity::{self, CPUINFO_PATH, DISK_DEVICE, MACHINE_ID_PATH, ResolverConfig};
use mess::requirements::{self, REQUIRED_PACKAGES};

/// Exit status for failures that stop the process before any file is touched
const EXIT_FATAL: i32 = 1;

/// Exit status for a failed seal or open
const EXIT_REPORTED: i32 = 2;

#[derive(Parser)]
#[command(name = "mess")]
#[command(version)]
#[command(about = "Encrypt or decrypt a file with a key derived from this machine.", long_about = None)]
struct Cli {
    /// File to encrypt, or a `.mess` file to decrypt
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// OS machine id file, preferred over hardware serials
    #[arg(long, value_name = "PATH", default_value = MACHINE_ID_PATH)]
    machine_id_file: PathBuf,

    /// Processor information file used by the hardware fallback
    #[arg(long, value_name = "PATH", default_value = CPUINFO_PATH)]
    cpuinfo_file: PathBuf,

    /// Disk whose serial number is used by the hardware fallback
    #[arg(long, value_name = "DEVICE", default_value = DISK_DEVICE)]
    disk_device: String,

    /// Do not check for or install the hardware query packages
    #[arg(long)]
    skip_requirements: bool,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let runner = SystemCommandRunner::new();
    let diag = TracingDiagnostics;

    if !cli.skip_requirements {
        let provisioned = requirements::fulfill_requirements(&runner, &REQUIRED_PACKAGES, &diag);
        if let Err(e) = provisioned {
            exit_with(&e);
        }
    }

    let config = ResolverConfig {
        machine_id_path: cli.machine_id_file,
        cpuinfo_path: cli.cpuinfo_file,
        disk_device: cli.disk_device,
    };
    let machine_identity = match identity::resolve_identity(&config, &runner, &diag) {
        Ok(machine_identity) => machine_identity,
        Err(e) => exit_with(&e),
    };

    println!("{machine_identity}");

    match file_ops::process_file(&cli.file, machine_identity.as_bytes(), &diag) {
        Ok((operation, output)) => {
            let verb = match operation {
                Operation::Seal => "Encrypted",
                Operation::Open => "Decrypted",
            };
            tracing::debug!(output = %output.display(), "{verb}");
        }
        Err(e) => exit_with(&e),
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_target(false),
        )
        .init();
}

/// Log `err` with its whole source chain and terminate
fn exit_with(err: &MessError) -> ! {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.ends_with(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }

    tracing::error!("{message}");
    let code = if err.is_fatal() {
        EXIT_FATAL
    } else {
        EXIT_REPORTED
    };
    process::exit(code);
}
