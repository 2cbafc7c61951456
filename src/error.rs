use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// How far an error is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The process cannot continue. Identity resolution and provisioning
    /// failures are always fatal.
    Fatal,
    /// The current file operation is aborted and the failure is reported.
    Reported,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The running operating system has no supported identity sources.
    UnsupportedPlatform,
    /// A required executable (or `sudo`) could not be found on `PATH`.
    ToolMissing,
    /// A hardware or package query exited unsuccessfully or could not be spawned.
    ToolFailed,
    /// The disk query output carried no serial number line.
    SerialNotFound,
    /// Every identity source reported itself unavailable.
    NoIdentitySource,
    /// The file to seal or open does not exist.
    NotFound,
    /// A file handed to open does not carry the container suffix.
    MissingSuffix,
    /// Container data ended before the salt and IV could be read.
    TruncatedInput,
    /// The ciphertext length is not a whole, non-zero number of blocks.
    BinaryFormat,
    /// Padding was malformed after decryption: wrong password or a
    /// corrupted container.
    DecryptionFailed,
    /// Unexpected state reached within mess logic.
    InternalInvariant,
    /// Interaction with the filesystem or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct MessError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    /// Whether the process may carry on after this error.
    pub severity: Severity,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl MessError {
    /// Creates a new reported error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            severity: Severity::Reported,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(category, msg)
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(category, msg)
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: Some(kind),
            source: Some(Box::new(source)),
            ..Self::new(category, msg)
        }
    }

    /// Marks the error as fatal to the whole process.
    pub fn into_fatal(mut self) -> Self {
        self.severity = Severity::Fatal;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving
    /// the original as source. Category, kind and severity carry over.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        let severity = self.severity;
        Self {
            category,
            kind,
            severity,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MessError>;
