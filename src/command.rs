//! External tool invocation
//!
//! Hardware queries and package management shell out to system tools.
//! All of that goes through [`CommandRunner`] so the identity resolver and
//! the provisioning step can be exercised against a scripted backend.

use crate::error::{ErrorCategory, ErrorKind, MessError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Program used to elevate privileged queries
pub const ELEVATOR: &str = "sudo";

/// Captured output of a tool that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} command not found. Ensure it is installed.")]
    NotFound { tool: String },

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// The tool ran but exited unsuccessfully. Displays the tool's own
    /// error text when it produced any.
    #[error("{}", describe_failure(.tool, .code, .stderr))]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn describe_failure(tool: &str, code: &Option<i32>, stderr: &str) -> String {
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match code {
        Some(code) => format!("{tool} exited with status {code}"),
        None => format!("{tool} was terminated by a signal"),
    }
}

impl From<ToolError> for MessError {
    fn from(err: ToolError) -> Self {
        let kind = match err {
            ToolError::NotFound { .. } => ErrorKind::ToolMissing,
            ToolError::Spawn { .. } | ToolError::Failed { .. } => ErrorKind::ToolFailed,
        };
        MessError::with_kind_and_source(ErrorCategory::Internal, kind, err.to_string(), err)
    }
}

/// Trait for running external tools
pub trait CommandRunner {
    /// Run `tool` with `args` as the current user.
    fn run(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError>;

    /// Run `tool` with `args` with elevated privileges.
    fn run_privileged(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError>;
}

/// Runs real processes, resolving every program on `PATH` first
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

fn resolve(tool: &str) -> Result<PathBuf, ToolError> {
    which::which(tool).map_err(|_| ToolError::NotFound {
        tool: tool.to_string(),
    })
}

fn execute(tool: &str, command: &mut Command) -> Result<ToolOutput, ToolError> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ToolError::Spawn {
            tool: tool.to_string(),
            source: e,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        let tool_path = resolve(tool)?;
        execute(tool, Command::new(tool_path).args(args))
    }

    fn run_privileged(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        let tool_path = resolve(tool)?;
        let elevator_path = resolve(ELEVATOR)?;
        execute(
            tool,
            Command::new(elevator_path).arg(tool_path).args(args),
        )
    }
}

/// Whether a recorded invocation asked for elevation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    User,
    Elevated,
}

type Scripted = std::result::Result<String, (Option<i32>, String)>;

/// Answers invocations from a fixed script (for testing)
///
/// Responses are keyed by the tool name followed by its arguments, joined
/// with single spaces. Any invocation without a scripted response behaves
/// as if the tool were not installed.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    responses: HashMap<String, Scripted>,
    calls: RefCell<Vec<(Privilege, String)>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful invocation printing `stdout`.
    pub fn succeed(mut self, invocation: &str, stdout: &str) -> Self {
        self.responses
            .insert(invocation.to_string(), Ok(stdout.to_string()));
        self
    }

    /// Script an invocation exiting with `code` and printing `stderr`.
    pub fn fail(mut self, invocation: &str, code: i32, stderr: &str) -> Self {
        self.responses.insert(
            invocation.to_string(),
            Err((Some(code), stderr.to_string())),
        );
        self
    }

    /// Every invocation seen so far, oldest first.
    pub fn calls(&self) -> Vec<(Privilege, String)> {
        self.calls.borrow().clone()
    }

    fn answer(
        &self,
        privilege: Privilege,
        tool: &str,
        args: &[&str],
    ) -> Result<ToolOutput, ToolError> {
        let invocation = std::iter::once(tool)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.borrow_mut().push((privilege, invocation.clone()));

        match self.responses.get(&invocation) {
            Some(Ok(stdout)) => Ok(ToolOutput::from_stdout(stdout.as_str())),
            Some(Err((code, stderr))) => Err(ToolError::Failed {
                tool: tool.to_string(),
                code: *code,
                stderr: stderr.clone(),
            }),
            None => Err(ToolError::NotFound {
                tool: tool.to_string(),
            }),
        }
    }
}

impl CommandRunner for ScriptedCommandRunner {
    fn run(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        self.answer(Privilege::User, tool, args)
    }

    fn run_privileged(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        self.answer(Privilege::Elevated, tool, args)
    }
}
