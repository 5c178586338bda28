//! On-instance persistent metadata: compatibility tag, setup-complete flag,
//! installed snap revisions (spec component C3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executor::Executor;

/// Path the store writes to. Also a recognised read location.
pub const CONFIG_PATH: &str = "/etc/craft-instance.conf";
/// Older, pre-rename config path. Recognised as a read location only (Open
/// Question resolution: kept readable for back-compat, never written).
pub const LEGACY_CONFIG_PATH: &str = "/etc/craft.conf";

/// Where a snap recorded in [`InstanceConfig`] was installed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapSource {
    Host,
    Store,
}

/// A previously-installed snap's bookkeeping entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapRecord {
    pub revision: String,
    pub source: SnapSource,
}

/// The persisted instance configuration document. Unknown top-level keys
/// are rejected so schema drift is caught rather than silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub compatibility_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub snaps: BTreeMap<String, SnapRecord>,
}

impl InstanceConfig {
    pub fn new(compatibility_tag: impl Into<String>) -> Self {
        Self { compatibility_tag: compatibility_tag.into(), setup: None, snaps: BTreeMap::new() }
    }
}

/// A partial update applied to an [`InstanceConfig`] via [`update`]. `None`
/// fields are left untouched; `snaps` entries are merged key-by-key and
/// never remove existing entries.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfigPatch {
    pub compatibility_tag: Option<String>,
    pub setup: Option<bool>,
    pub snaps: BTreeMap<String, SnapRecord>,
}

impl InstanceConfigPatch {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self { compatibility_tag: Some(tag.into()), ..Default::default() }
    }

    pub fn with_setup(mut self, setup: bool) -> Self {
        self.setup = Some(setup);
        self
    }

    pub fn with_snap(mut self, name: impl Into<String>, record: SnapRecord) -> Self {
        self.snaps.insert(name.into(), record);
        self
    }
}

/// Read the instance config. Returns `Ok(None)` when no config file exists
/// at either recognised location. A file that exists but cannot be parsed
/// raises [`Error::BaseCompatibility`], per invariant (iii): an unparsable
/// document is treated as incompatibility, never as "absent".
pub fn read(executor: &mut dyn Executor) -> Result<Option<InstanceConfig>> {
    for path in [CONFIG_PATH, LEGACY_CONFIG_PATH] {
        match pull_text(executor, path)? {
            Some(text) => {
                let parsed: InstanceConfig = toml::from_str(&text).map_err(|err| {
                    Error::compatibility_with(
                        "failed to parse instance configuration file",
                        err.to_string(),
                    )
                })?;
                return Ok(Some(parsed));
            }
            None => continue,
        }
    }
    Ok(None)
}

fn pull_text(executor: &mut dyn Executor, path: &str) -> Result<Option<String>> {
    use crate::executor::CommandSpec;

    let probe = executor.execute_run(&CommandSpec::new(["test", "-f", path]).no_check())?;
    if !probe.success() {
        return Ok(None);
    }

    let out = executor.execute_run(&CommandSpec::new(["cat", path]))?;
    Ok(Some(out.stdout))
}

/// Render `config` and push it to [`CONFIG_PATH`] with mode 0644, owner
/// `root:root`. Callers must never write raw bytes to the config path
/// directly; this is the sole writer.
pub fn write(executor: &mut dyn Executor, config: &InstanceConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|err| Error::configuration_failed_with("failed to render instance configuration", err.to_string()))?;
    executor.push_file_io(CONFIG_PATH, rendered.as_bytes(), 0o644, "root", "root")
}

/// Read-merge-write: read the current document (or start from an empty one
/// anchored on `patch.compatibility_tag`), apply `patch` (new keys added,
/// existing scalars overwritten, `snaps` merged key-wise, nothing deleted),
/// and write the result back.
pub fn update(executor: &mut dyn Executor, patch: InstanceConfigPatch) -> Result<InstanceConfig> {
    let mut config = match read(executor)? {
        Some(existing) => existing,
        None => {
            let tag = patch.compatibility_tag.clone().ok_or_else(|| {
                Error::configuration_failed(
                    "cannot update instance configuration: no existing document and no compatibility_tag supplied",
                )
            })?;
            InstanceConfig::new(tag)
        }
    };

    if let Some(tag) = patch.compatibility_tag {
        config.compatibility_tag = tag;
    }
    if let Some(setup) = patch.setup {
        config.setup = Some(setup);
    }
    for (name, record) in patch.snaps {
        config.snaps.insert(name, record);
    }

    write(executor, &config)?;
    Ok(config)
}
