//! The pluggable backend seam (spec.md §1a): launching instances from a
//! remote image, checking existence, and publishing/reusing snapshots. Also
//! the compatibility image table and the on-instance status heartbeat.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::executor::Executor;

use super::base::BaseAlias;

/// A backend-specific remote image reference the Engine can launch from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteImage {
    pub remote_name: String,
    pub image_name: String,
    pub is_stable: bool,
}

/// Maps a [`BaseAlias`] to the image the Engine should launch, grounded in
/// the teacher's static asset tables in `src/managed/mod.rs`.
pub fn compatibility_image(alias: BaseAlias) -> RemoteImage {
    match alias {
        BaseAlias::Focal => RemoteImage { remote_name: "release".to_string(), image_name: "20.04".to_string(), is_stable: true },
        BaseAlias::Jammy => RemoteImage { remote_name: "release".to_string(), image_name: "22.04".to_string(), is_stable: true },
        BaseAlias::Noble => RemoteImage { remote_name: "release".to_string(), image_name: "24.04".to_string(), is_stable: true },
        BaseAlias::Devel => RemoteImage { remote_name: "daily".to_string(), image_name: "devel".to_string(), is_stable: false },
    }
}

/// The snapshot image name the Engine publishes after a successful first
/// setup, so later launches can warm-start from it (spec.md §4.6).
pub fn snapshot_image_name(remote_name: &str, compatibility_tag: &str, alias: BaseAlias) -> String {
    let alias_slug = match alias {
        BaseAlias::Focal => "focal",
        BaseAlias::Jammy => "jammy",
        BaseAlias::Noble => "noble",
        BaseAlias::Devel => "devel",
    };
    format!("{remote_name}-r{compatibility_tag}-{alias_slug}")
}

/// A backend capable of launching, destroying and snapshotting instances.
/// The Engine (`core::engine`) drives every backend exclusively through
/// this trait, the same separation the teacher keeps between its broker
/// layer and `ImageManager`.
pub trait Provider {
    /// Whether the backend's own tooling (VM/container runtime) is present.
    fn is_installed(&self) -> Result<bool>;

    /// Install the backend's tooling, if policy allows.
    fn install(&mut self) -> Result<()>;

    fn exists(&mut self, name: &str) -> Result<bool>;

    /// Launch a fresh instance named `name` from `image` and return a
    /// handle to drive it.
    fn launch(&mut self, name: &str, image: &RemoteImage) -> Result<Box<dyn Executor>>;

    /// Obtain an executor handle for an instance that already exists,
    /// without starting or configuring it.
    fn create_environment(&mut self, name: &str) -> Result<Box<dyn Executor>>;

    fn delete(&mut self, name: &str, force: bool) -> Result<()>;

    fn snapshot_exists(&mut self, image_name: &str) -> Result<bool>;

    /// Publish `executor`'s current instance state as `image_name`.
    fn publish_snapshot(&mut self, executor: &mut dyn Executor, image_name: &str) -> Result<()>;

    /// Launch from a previously published snapshot.
    fn launch_from_snapshot(&mut self, name: &str, image_name: &str) -> Result<Box<dyn Executor>>;
}

const STATUS_PATH: &str = "/run/provider-orchestrator-status.json";

/// Coarse lifecycle status an instance reports of itself, read by external
/// tooling that wants to know whether a long bring-up is still progressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Starting,
    Preparing,
    Finished,
    InUse,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StatusRecord {
    status: ProviderStatus,
    updated_at: String,
}

/// Write the current status and an RFC-3339 heartbeat timestamp.
pub fn write_status(executor: &mut dyn Executor, status: ProviderStatus, now: OffsetDateTime) -> Result<()> {
    let updated_at = now.format(&Rfc3339).map_err(|err| Error::configuration(format!("failed to format heartbeat timestamp: {err}")))?;
    let record = StatusRecord { status, updated_at };
    let rendered = serde_json::to_vec(&record)
        .map_err(|err| Error::configuration(format!("failed to render status record: {err}")))?;
    executor.push_file_io(STATUS_PATH, &rendered, 0o644, "root", "root")
}

/// Read back the status record previously written by [`write_status`].
pub fn read_status(executor: &mut dyn Executor) -> Result<Option<ProviderStatus>> {
    let spec = crate::executor::CommandSpec::new(["cat", STATUS_PATH]).no_check();
    let out = executor.execute_run(&spec)?;
    if !out.success() {
        return Ok(None);
    }
    let record: StatusRecord = serde_json::from_str(&out.stdout)
        .map_err(|err| Error::configuration(format!("failed to parse status record: {err}")))?;
    Ok(Some(record.status))
}
