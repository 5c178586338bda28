//! The narrow capability surface a pluggable backend must provide (spec
//! component C1). The Base bring-up pipeline and the Snap Installer drive
//! whichever backend is in use exclusively through this trait.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// A single subprocess invocation inside an instance.
///
/// `env` models the "`None`-means-unset" rule explicitly: an absent map
/// means "inherit the executor's default command environment", an entry
/// with a `None` value means "unset this variable", and `Some(v)` sets it.
/// Using a `Vec` of pairs (rather than a map) preserves caller-specified
/// ordering, which backends need to translate into `env -u K` / `K=V`
/// argument lists unambiguously.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Option<Vec<(String, Option<String>)>>,
    pub timeout: Option<Duration>,
    pub check: bool,
}

impl CommandSpec {
    pub fn new(args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: None,
            timeout: None,
            check: true,
        }
    }

    pub fn with_env(mut self, env: Vec<(String, Option<String>)>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_check(mut self) -> Self {
        self.check = false;
        self
    }
}

/// The result of an [`Executor::execute_run`] call.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A bind-mount between a host path and an in-instance path.
///
/// Unique by `(target, host_source)`; `device_id` is derived deterministically
/// from the target path so the same mount always gets the same collision-free
/// identifier across processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_source: String,
    pub target: String,
    pub device_id: String,
}

impl Mount {
    pub fn new(host_source: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        let device_id = device_id_for_target(&target);
        Self { host_source: host_source.into(), target, device_id }
    }
}

/// Deterministic short identifier derived from a mount target path, used by
/// backends that require a unique device tag per mount (e.g. a 9p/virtiofs
/// mount tag). Grounded on the same hash-and-truncate technique the teacher
/// uses for content-addressed asset identifiers.
pub fn device_id_for_target(target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// A running (or already-exited) command started via
/// [`Executor::execute_popen`]. The caller drains stdout/stderr one line at
/// a time while the command is still running; cancellation is `kill`, not
/// dropping the handle. `wait` blocks for exit and folds any output the
/// caller hasn't already drained into the final [`CommandOutput`].
pub trait ProcessHandle {
    /// Next buffered line of stdout, or `None` once the stream is closed.
    fn read_stdout_line(&mut self) -> Result<Option<String>>;

    /// Next buffered line of stderr, or `None` once the stream is closed.
    fn read_stderr_line(&mut self) -> Result<Option<String>>;

    /// Block until the process exits. Honours `CommandSpec::check`: a
    /// non-zero exit becomes `Error::Backend` exactly as `execute_run` would
    /// report it, unless the spec that started this handle had `check = false`.
    fn wait(&mut self) -> Result<CommandOutput>;

    /// Terminate the process. The caller's cancellation path.
    fn kill(&mut self) -> Result<()>;
}

/// Narrow capability surface over an instance. Every backend must provide
/// all operations; the pipeline treats failures as [`crate::error::Error::Backend`]
/// except at the few points where recovery is possible (see
/// `core::engine` and `core::network_probe`).
pub trait Executor {
    /// Synchronous command execution. See [`CommandSpec`] for environment
    /// and check semantics.
    fn execute_run(&mut self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Streaming variant of `execute_run`: the caller reads stdout/stderr as
    /// the command runs rather than waiting for it to finish, and may
    /// cancel by killing the returned handle instead of waiting it out.
    fn execute_popen(&mut self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>>;

    /// Push a file from the host filesystem to `dest_path` inside the
    /// instance. Atomic at the destination; owner `root:root`; mode
    /// preserved from host when possible.
    fn push_file(&mut self, host_path: &str, dest_path: &str) -> Result<()>;

    /// Content-addressed push that never touches the host filesystem beyond
    /// scratch space. The final move to `dest_path` is atomic and ownership/
    /// mode are applied before the move is observable.
    fn push_file_io(
        &mut self,
        dest_path: &str,
        content: &[u8],
        mode: u32,
        owner_user: &str,
        owner_group: &str,
    ) -> Result<()>;

    /// Pull a file from `src_path` inside the instance to the host.
    fn pull_file(&mut self, src_path: &str, host_path: &str) -> Result<()>;

    /// Idempotent bind-mount; re-mounting the same pair is a no-op.
    fn mount(&mut self, mount: &Mount) -> Result<()>;

    /// Whether this backend can perform bind-mounts at all (remote backends
    /// may not be able to).
    fn supports_mount(&self) -> bool {
        true
    }

    fn unmount(&mut self, target: &str) -> Result<()>;

    fn unmount_all(&mut self) -> Result<()>;

    fn exists(&mut self) -> Result<bool>;

    fn is_running(&mut self) -> Result<bool>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self, delay_mins: u32) -> Result<()>;

    fn delete(&mut self, force: bool) -> Result<()>;
}
