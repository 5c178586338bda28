//! Structured error taxonomy shared by every component of the engine.
//!
//! Every error carries a `brief`, an optional `details` blob and an optional
//! `resolution` hint. Rendering joins the three with newlines, matching the
//! user-visible form the orchestration layer is expected to produce.

use std::fmt;
use std::path::PathBuf;

/// Convenient result alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

const RESOLUTION_CLEAN: &str = "Clean incompatible instance and retry the requested operation.";
const RESOLUTION_NETWORK: &str = "Verify that the environment has internet connectivity and retry.";

/// Root error type for the provider orchestration engine.
///
/// Every variant exposes `(brief, details, resolution)` through
/// [`Error::triple`] so callers can render it however they like; [`Display`]
/// joins the three with newlines.
#[derive(Debug)]
pub enum Error {
    /// Setup failed for a reason that isn't clearly a compatibility problem.
    BaseConfiguration {
        brief: String,
        details: Option<String>,
        resolution: Option<String>,
    },
    /// The instance is incompatible with the requested Base, either because
    /// its compatibility tag or its OS disagrees.
    BaseCompatibility {
        reason: String,
        details: Option<String>,
    },
    /// A command failed and the network reachability probe also failed,
    /// indicating the underlying cause is connectivity, not the command.
    Network,
    /// The caller selected a Base whose mapped remote image is unstable and
    /// did not opt in via `allow_unstable`.
    UnstableImage { brief: String },
    /// The backend itself failed to perform an operation.
    Backend {
        brief: String,
        details: Option<String>,
        resolution: Option<String>,
    },
    /// The backend tooling could not be installed.
    BackendInstallation { brief: String, details: Option<String> },
    /// A step of the Snap Installer failed.
    SnapInstallation { brief: String, details: Option<String> },
    /// An entitlement (Pro) token could not be obtained.
    MachineToken { brief: String },
    /// A caller-supplied identifier (hostname, channel, etc.) failed
    /// validation before reaching any backend.
    Configuration { brief: String },
    /// The instance's own status heartbeat reports a setup already in
    /// progress. Advisory only — the Engine performs no locking, so this is
    /// a best-effort conflict detection, not a guarantee.
    SetupInProgress { brief: String },
    /// Wraps a lower-level I/O failure touching a specific path.
    Io { path: PathBuf, source: std::io::Error },
}

impl Error {
    /// Construct a [`Error::BaseCompatibility`] error.
    pub fn compatibility(reason: impl Into<String>) -> Self {
        Error::BaseCompatibility { reason: reason.into(), details: None }
    }

    /// Construct a [`Error::BaseCompatibility`] error with attached details.
    pub fn compatibility_with(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Error::BaseCompatibility { reason: reason.into(), details: Some(details.into()) }
    }

    /// Construct a [`Error::BaseConfiguration`] error from a brief only.
    pub fn configuration_failed(brief: impl Into<String>) -> Self {
        Error::BaseConfiguration { brief: brief.into(), details: None, resolution: None }
    }

    /// Construct a [`Error::BaseConfiguration`] error carrying process
    /// failure details.
    pub fn configuration_failed_with(brief: impl Into<String>, details: impl Into<String>) -> Self {
        Error::BaseConfiguration { brief: brief.into(), details: Some(details.into()), resolution: None }
    }

    /// Construct a [`Error::Backend`] error.
    pub fn backend(brief: impl Into<String>, details: Option<String>) -> Self {
        Error::Backend { brief: brief.into(), details, resolution: None }
    }

    /// Construct a [`Error::SnapInstallation`] error.
    pub fn snap_installation(brief: impl Into<String>, details: Option<String>) -> Self {
        Error::SnapInstallation { brief: brief.into(), details }
    }

    /// Construct a [`Error::Configuration`] error.
    pub fn configuration(brief: impl Into<String>) -> Self {
        Error::Configuration { brief: brief.into() }
    }

    /// Decompose the error into its `(brief, details, resolution)` triple.
    pub fn triple(&self) -> (String, Option<String>, Option<String>) {
        match self {
            Error::BaseConfiguration { brief, details, resolution } => {
                (brief.clone(), details.clone(), resolution.clone())
            }
            Error::BaseCompatibility { reason, details } => (
                format!("Incompatible base detected: {reason}."),
                details.clone(),
                Some(RESOLUTION_CLEAN.to_string()),
            ),
            Error::Network => (
                "A network related operation failed in a context of no network access.".to_string(),
                None,
                Some(RESOLUTION_NETWORK.to_string()),
            ),
            Error::UnstableImage { brief } => (brief.clone(), None, None),
            Error::Backend { brief, details, resolution } => {
                (brief.clone(), details.clone(), resolution.clone())
            }
            Error::BackendInstallation { brief, details } => (brief.clone(), details.clone(), None),
            Error::SnapInstallation { brief, details } => (brief.clone(), details.clone(), None),
            Error::MachineToken { brief } => (brief.clone(), None, None),
            Error::Configuration { brief } => (brief.clone(), None, None),
            Error::SetupInProgress { brief } => (
                brief.clone(),
                None,
                Some("Wait for the other setup to finish, or confirm it is stuck and clean the instance.".to_string()),
            ),
            Error::Io { path, source } => {
                (format!("Failed to access {}: {source}", path.display()), None, None)
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (brief, details, resolution) = self.triple();
        write!(f, "{brief}")?;
        if let Some(details) = details {
            write!(f, "\n{details}")?;
        }
        if let Some(resolution) = resolution {
            write!(f, "\n{resolution}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Render the command line, exit code and captured streams of a failed
/// process invocation into a details string, in the same shape every
/// component error attaches under `details`.
pub fn details_from_command(cmd: &[String], exit_code: Option<i32>, stdout: &str, stderr: &str) -> String {
    let cmd_string = shell_join(cmd);
    let mut lines = vec![
        format!("* Command that failed: {cmd_string:?}"),
        format!(
            "* Command exit code: {}",
            exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
        ),
    ];
    if !stdout.is_empty() {
        lines.push(format!("* Command output: {stdout:?}"));
    }
    if !stderr.is_empty() {
        lines.push(format!("* Command standard error output: {stderr:?}"));
    }
    lines.join("\n")
}

fn shell_join(cmd: &[String]) -> String {
    cmd.iter()
        .map(|part| {
            if part.chars().all(|c| c.is_alphanumeric() || "-_./:=".contains(c)) {
                part.clone()
            } else {
                format!("'{}'", part.replace('\'', "'\\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
