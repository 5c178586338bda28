//! Fetching a snap package and its assertion chain from the host,
//! uploading it, and installing it at a known revision with at-most-once
//! semantics (spec component C4).

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::executor::{CommandSpec, Executor};

use super::instance_config::{self, InstanceConfigPatch, SnapRecord, SnapSource};

/// Snap metadata as reported by the host snap daemon's `GET /v2/snaps/<name>`.
#[derive(Debug, Clone)]
pub struct HostSnapInfo {
    pub id: String,
    pub revision: String,
    pub publisher_id: String,
    pub base: Option<String>,
}

/// The host-side snap daemon IPC (spec §6). Implementations talk to
/// `/run/snapd.socket`; kept behind a trait so the assertion/injection logic
/// is testable without a real snapd.
pub trait HostSnapd {
    fn snap_info(&self, name: &str) -> Result<HostSnapInfo>;
    /// Stream the snap package from the daemon's file endpoint. A failure
    /// here (non-200, connection error) triggers the `snap pack` fallback.
    fn fetch_snap_file(&self, name: &str) -> Result<Vec<u8>>;
    /// `snap pack` against the host's installed copy, used when the daemon
    /// download fails (e.g. the snap was installed with `snap try`).
    fn pack_snap(&self, name: &str) -> Result<Vec<u8>>;
    /// `snap known <query...>`.
    fn assertion(&self, query: &[&str]) -> Result<Vec<u8>>;
}

fn store_name(snap_name: &str) -> &str {
    snap_name.split('_').next().unwrap_or(snap_name)
}

fn get_host_snap(host: &dyn HostSnapd, snap_name: &str) -> Result<Vec<u8>> {
    match host.fetch_snap_file(snap_name) {
        Ok(bytes) => Ok(bytes),
        Err(_) => host.pack_snap(snap_name),
    }
}

/// Inject a snap from the host's already-installed copy at the exact
/// revision present on the host.
pub fn inject_from_host(executor: &mut dyn Executor, host: &dyn HostSnapd, snap_name: &str, classic: bool) -> Result<()> {
    let snap_store_name = store_name(snap_name).to_string();
    let host_info = host.snap_info(snap_name)?;

    if let Some(base) = &host_info.base {
        inject_from_host(executor, host, base, false)?;
    }

    let config = instance_config::read(executor)?;
    let prior = config.as_ref().and_then(|c| c.snaps.get(&snap_store_name).cloned());

    if let Some(prior) = &prior {
        if prior.source == SnapSource::Host && prior.revision == host_info.revision {
            return Ok(());
        }
        if prior.source != SnapSource::Host {
            remove_installed_snap(executor, &snap_store_name)?;
        }
    }

    let is_dangerous = host_info.revision.starts_with('x');
    let assert_path = format!("/tmp/{snap_store_name}.assert");
    if !is_dangerous {
        let mut assertions = Vec::new();
        for query in assertion_queries(&snap_store_name, &host_info) {
            let refs: Vec<&str> = query.iter().map(String::as_str).collect();
            assertions.extend(host.assertion(&refs)?);
            assertions.push(b'\n');
        }
        executor.push_file_io(&assert_path, &assertions, 0o644, "root", "root")?;
        executor.execute_run(&CommandSpec::new(["snap", "ack", assert_path.as_str()]).with_timeout(std::time::Duration::from_secs(30)))?;
    }

    let snap_bytes = get_host_snap(host, snap_name)?;
    let snap_path = format!("/tmp/{snap_store_name}.snap");
    executor.push_file_io(&snap_path, &snap_bytes, 0o644, "root", "root")?;

    let mut install_args = vec!["snap".to_string(), "install".to_string()];
    if classic {
        install_args.push("--classic".to_string());
    }
    if is_dangerous {
        install_args.push("--dangerous".to_string());
    }
    install_args.push(snap_path);
    executor
        .execute_run(&CommandSpec::new(install_args).with_timeout(std::time::Duration::from_secs(120)))
        .map_err(|err| Error::snap_installation(format!("failed to install snap {snap_store_name:?}"), Some(err.to_string())))?;

    instance_config::update(
        executor,
        InstanceConfigPatch::default().with_snap(
            snap_store_name,
            SnapRecord { revision: host_info.revision, source: SnapSource::Host },
        ),
    )?;

    Ok(())
}

fn assertion_queries(snap_store_name: &str, info: &HostSnapInfo) -> [Vec<String>; 4] {
    [
        vec![
            "account-key".to_string(),
            "public-key-sha3-384=BWDEoaqyr25nF5SNCvEv2v7QnM9QsfCc0PBMYD_i2NGSQ32EF2d4D0hqUel3m8ul".to_string(),
        ],
        vec!["snap-declaration".to_string(), format!("snap-name={snap_store_name}")],
        vec![
            "snap-revision".to_string(),
            format!("snap-revision={}", info.revision),
            format!("snap-id={}", info.id),
        ],
        vec!["account".to_string(), format!("account-id={}", info.publisher_id)],
    ]
}

fn remove_installed_snap(executor: &mut dyn Executor, name: &str) -> Result<()> {
    executor
        .execute_run(&CommandSpec::new(["snap", "remove", name]).with_timeout(std::time::Duration::from_secs(60)))
        .map(|_| ())
        .map_err(|err| Error::snap_installation(format!("failed to remove snap {name:?}"), Some(err.to_string())))
}

/// Install (or refresh) a snap from the store into the instance.
pub fn install_from_store(executor: &mut dyn Executor, snap_name: &str, channel: &str, classic: bool) -> Result<()> {
    let snap_store_name = store_name(snap_name).to_string();

    let config = instance_config::read(executor)?;
    let prior = config.as_ref().and_then(|c| c.snaps.get(&snap_store_name).cloned());

    let already_from_store = match &prior {
        Some(record) if record.source == SnapSource::Store => true,
        Some(_) => {
            remove_installed_snap(executor, &snap_store_name)?;
            false
        }
        None => false,
    };

    let mut args = vec!["snap".to_string()];
    if already_from_store {
        args.push("refresh".to_string());
        args.push(snap_store_name.clone());
        args.push(format!("--channel={channel}"));
    } else {
        args.push("install".to_string());
        args.push(snap_store_name.clone());
        args.push(format!("--channel={channel}"));
        if classic {
            args.push("--classic".to_string());
        }
    }

    executor
        .execute_run(&CommandSpec::new(args).with_timeout(std::time::Duration::from_secs(120)))
        .map_err(|err| Error::snap_installation(format!("failed to install/refresh snap {snap_store_name:?}"), Some(err.to_string())))?;

    let revision = query_instance_snap_revision(executor, &snap_store_name)?;

    instance_config::update(
        executor,
        InstanceConfigPatch::default().with_snap(snap_store_name, SnapRecord { revision, source: SnapSource::Store }),
    )?;

    Ok(())
}

#[derive(Deserialize)]
struct SnapdResultEnvelope {
    #[serde(rename = "status-code")]
    status_code: u32,
    result: Option<SnapdResult>,
}

#[derive(Deserialize)]
struct SnapdResult {
    revision: String,
}

fn query_instance_snap_revision(executor: &mut dyn Executor, snap_store_name: &str) -> Result<String> {
    let url = format!("http://localhost/v2/snaps/{snap_store_name}");
    let out = executor.execute_run(&CommandSpec::new([
        "curl",
        "--silent",
        "--unix-socket",
        "/run/snapd.socket",
        url.as_str(),
    ]))?;

    let envelope: SnapdResultEnvelope = serde_json::from_str(&out.stdout)
        .map_err(|err| Error::snap_installation("unable to parse snapd revision response", Some(err.to_string())))?;

    match envelope.result {
        Some(result) if envelope.status_code == 200 => Ok(result.revision),
        _ => Err(Error::snap_installation(format!("snap {snap_store_name:?} not reported as installed by target snapd"), None)),
    }
}
