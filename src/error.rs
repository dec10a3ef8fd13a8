// src/error.rs
//! Error types for the upgrade helper
//!
//! Terminal outcomes of an upgrade attempt map onto the build task that
//! failed (fetch, patch, configure, package, compile). Command failures
//! carry the captured output so the build log classifier can inspect it.

use thiserror::Error;

/// Result type for upgrade operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while upgrading a recipe
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch repair options were exhausted
    #[error("do_fetch failed: {0}")]
    Fetch(String),

    /// A patch no longer applies and could not be suppressed
    #[error("do_patch failed: {0}")]
    Patch(String),

    /// Configure failed for a reason unrelated to licensing
    #[error("do_configure failed: {0}")]
    Configure(String),

    /// A license checksum changed and could not be repaired
    #[error("license issue: {0}")]
    License(String),

    /// Packaging failed
    #[error("do_package failed: {0}")]
    Package(String),

    /// Any other build failure
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// Build output did not name a failed task
    #[error("could not detect the failed task in the build output")]
    Classification {
        /// Output that could not be classified
        stdout: String,
    },

    /// The build tool exited unsuccessfully
    #[error("{message}")]
    Execution {
        message: String,
        stdout: String,
        stderr: String,
    },

    /// A version control command exited unsuccessfully
    #[error("git {command} failed: {stderr}")]
    Command {
        command: String,
        stdout: String,
        stderr: String,
    },

    /// The recipe is already at the requested version
    #[error("recipe is already at the requested version")]
    UpgradeNotNeeded,

    /// SRC_URI uses a protocol without upgrade support
    #[error("unsupported SRC_URI protocol: {0}")]
    UnsupportedProtocol(String),

    /// A required variable is missing from the recipe environment
    #[error("variable {0} missing from the recipe environment")]
    MissingVariable(String),

    /// Configuration file could not be read or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// The operator declined to continue
    #[error("aborted: {0}")]
    Aborted(String),

    /// A log pattern built from recipe data failed to compile
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Run statistics could not be serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an execution error from captured command output
    pub fn execution(message: impl Into<String>, stdout: &[u8], stderr: &[u8]) -> Self {
        Self::Execution {
            message: message.into(),
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    /// Captured stdout of a failed command, if this error carries one
    pub fn stdout(&self) -> Option<&str> {
        match self {
            Self::Execution { stdout, .. }
            | Self::Command { stdout, .. }
            | Self::Classification { stdout } => Some(stdout),
            _ => None,
        }
    }

    /// Short status label recorded in the run statistics
    pub fn status(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "Failed(do_fetch)",
            Self::Patch(_) => "Failed(do_patch)",
            Self::Configure(_) => "Failed(do_configure)",
            Self::License(_) => "Failed(license issue)",
            Self::Package(_) => "Failed(do_package)",
            Self::Compilation(_) => "Failed(do_compile)",
            Self::UpgradeNotNeeded => "Upgrade not needed",
            Self::UnsupportedProtocol(_) => "SRC_URI protocol not supported",
            Self::Aborted(_) => "Aborted",
            _ => "Failed(other errors)",
        }
    }
}
