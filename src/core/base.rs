//! The ordered bring-up pipeline that takes a freshly launched (or
//! reattached) instance from "exists" to "ready to use" (spec component C5).

use std::collections::BTreeMap;
use std::time::Duration;

use time::OffsetDateTime;

use crate::diagnostics::{Event, Reporter};
use crate::error::{Error, Result};
use crate::executor::{CommandSpec, Executor};

use super::instance_config::{self, InstanceConfigPatch};
use super::network_probe::{self, ReachabilityTarget};
use super::provider::{write_status, ProviderStatus};
use super::retry::retry_until_timeout;
use super::snap_installer::{self, HostSnapd};

const SYSTEM_READY_TIMEOUT: Duration = Duration::from_secs(120);
const SYSTEM_READY_INTERVAL: Duration = Duration::from_secs(2);
const NETWORK_READY_TIMEOUT: Duration = Duration::from_secs(120);
const NETWORK_READY_INTERVAL: Duration = Duration::from_secs(2);
const NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A supported OS family/release an instance can be brought up as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseAlias {
    Focal,
    Jammy,
    Noble,
    /// The in-development successor release; version mismatches are
    /// tolerated for devel aliases (spec.md §4.5 phase 2).
    Devel,
}

/// Static facts about a [`BaseAlias`], the Rust analogue of
/// `BuilddBaseAlias` generalised beyond a single distro family.
#[derive(Debug, Clone)]
pub struct BaseAliasInfo {
    pub os_id: &'static str,
    pub os_version: &'static str,
    pub is_devel: bool,
    pub is_eol: bool,
    pub default_environment: Vec<(String, Option<String>)>,
    pub default_packages: Vec<String>,
}

impl BaseAlias {
    pub fn info(&self) -> BaseAliasInfo {
        let default_environment = vec![
            ("DEBIAN_FRONTEND".to_string(), Some("noninteractive".to_string())),
            ("LANG".to_string(), Some("C.UTF-8".to_string())),
        ];
        let default_packages = vec!["ca-certificates".to_string(), "curl".to_string()];

        match self {
            BaseAlias::Focal => BaseAliasInfo {
                os_id: "ubuntu",
                os_version: "20.04",
                is_devel: false,
                is_eol: true,
                default_environment,
                default_packages,
            },
            BaseAlias::Jammy => BaseAliasInfo {
                os_id: "ubuntu",
                os_version: "22.04",
                is_devel: false,
                is_eol: false,
                default_environment,
                default_packages,
            },
            BaseAlias::Noble => BaseAliasInfo {
                os_id: "ubuntu",
                os_version: "24.04",
                is_devel: false,
                is_eol: false,
                default_environment,
                default_packages,
            },
            BaseAlias::Devel => BaseAliasInfo {
                os_id: "ubuntu",
                os_version: "devel",
                is_devel: true,
                is_eol: false,
                default_environment,
                default_packages,
            },
        }
    }

    pub fn compatibility_tag(&self) -> String {
        format!("{}-{}", self.info().os_id, self.info().os_version)
    }
}

/// A single snap the bring-up pipeline must ensure is installed.
pub struct SnapSpec {
    pub name: String,
    pub channel: Option<String>,
    pub classic: bool,
    pub from_host: bool,
}

/// Strategy for the package-manager-specific phases of setup
/// (spec.md §9: prefer small composition over a deep class hierarchy).
pub trait PackageManager {
    fn update(&self, executor: &mut dyn Executor) -> Result<()>;
    fn install(&self, executor: &mut dyn Executor, packages: &[String]) -> Result<()>;
    fn autoremove(&self, executor: &mut dyn Executor) -> Result<()>;
    fn clean(&self, executor: &mut dyn Executor) -> Result<()>;
    fn configure_eol_sources(&self, executor: &mut dyn Executor) -> Result<()>;
}

/// The only shipped [`PackageManager`], grounded in buildd's `_setup_apt`.
pub struct AptPackageManager;

impl PackageManager for AptPackageManager {
    fn update(&self, executor: &mut dyn Executor) -> Result<()> {
        executor
            .execute_run(&CommandSpec::new(["apt-get", "update"]).with_timeout(Duration::from_secs(120)))
            .map(|_| ())
    }

    fn install(&self, executor: &mut dyn Executor, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut args = vec!["apt-get".to_string(), "install".to_string(), "-y".to_string()];
        args.extend(packages.iter().cloned());
        executor.execute_run(&CommandSpec::new(args).with_timeout(Duration::from_secs(600))).map(|_| ())
    }

    fn autoremove(&self, executor: &mut dyn Executor) -> Result<()> {
        executor.execute_run(&CommandSpec::new(["apt-get", "autoremove", "-y"])).map(|_| ())
    }

    fn clean(&self, executor: &mut dyn Executor) -> Result<()> {
        executor.execute_run(&CommandSpec::new(["apt-get", "clean"])).map(|_| ())
    }

    fn configure_eol_sources(&self, executor: &mut dyn Executor) -> Result<()> {
        let sources = "deb http://old-releases.ubuntu.com/ubuntu/ /\n";
        executor.push_file_io("/etc/apt/sources.list", sources.as_bytes(), 0o644, "root", "root")
    }
}

/// A fully-specified target environment: which OS, which packages and
/// snaps, which environment variables, and how to prime the package
/// manager. Owns the fourteen-phase setup pipeline and its `warmup`
/// subset.
pub struct Base {
    pub alias: BaseAlias,
    pub compatibility_tag: String,
    pub hostname: String,
    pub environment: Vec<(String, Option<String>)>,
    pub snaps: Vec<SnapSpec>,
    pub packages: Vec<String>,
    pub use_default_packages: bool,
    pub cache_path: Option<String>,
    pub package_manager: Box<dyn PackageManager>,
    pub host_snapd: Option<Box<dyn HostSnapd>>,
}

impl Base {
    pub fn new(alias: BaseAlias, hostname: impl Into<String>) -> Self {
        Self {
            compatibility_tag: alias.compatibility_tag(),
            alias,
            hostname: hostname.into(),
            environment: Vec::new(),
            snaps: Vec::new(),
            packages: Vec::new(),
            use_default_packages: true,
            cache_path: None,
            package_manager: Box::new(AptPackageManager),
            host_snapd: None,
        }
    }

    fn run_checked(&self, executor: &mut dyn Executor, spec: CommandSpec) -> Result<()> {
        executor.execute_run(&spec).map(|_| ())
    }

    /// The pipeline's single subprocess gateway for commands whose failure
    /// might actually mean "no network". Refuses the nonsensical
    /// `check=false, verify_network=true` combination, matching spec.md
    /// §4.5's command execution rule.
    fn run_checked_verify_network(&self, executor: &mut dyn Executor, spec: CommandSpec) -> Result<()> {
        if !spec.check {
            return Err(Error::configuration("verify_network requires check=true"));
        }
        match executor.execute_run(&spec) {
            Ok(_) => Ok(()),
            Err(err) => {
                if network_probe::probe_reachable(executor, &ReachabilityTarget::default(), NETWORK_PROBE_TIMEOUT) {
                    Err(err)
                } else {
                    Err(Error::Network)
                }
            }
        }
    }

    /// First-time bring-up: all fourteen phases in order.
    pub fn setup(&mut self, executor: &mut dyn Executor, reporter: &mut dyn Reporter) -> Result<()> {
        self.phase_compatibility_gate(executor)?;
        self.phase_os_gate(executor)?;
        self.phase_mark_in_progress(executor)?;

        reporter.report(Event::PhaseStarted { phase: "wait_for_system_ready" });
        self.wait_for_system_ready(executor)?;
        reporter.report(Event::PhaseCompleted { phase: "wait_for_system_ready" });

        self.phase_environment_file(executor)?;
        self.phase_persist_tag(executor)?;
        self.phase_hostname(executor)?;
        self.phase_networking(executor)?;

        reporter.report(Event::PhaseStarted { phase: "wait_for_network_ready" });
        self.wait_for_network_ready(executor)?;
        reporter.report(Event::PhaseCompleted { phase: "wait_for_network_ready" });

        write_status(executor, ProviderStatus::Preparing, OffsetDateTime::now_utc())?;

        if self.alias.info().is_eol {
            self.package_manager.configure_eol_sources(executor)?;
        }

        self.phase_package_priming(executor)?;
        self.phase_snap_daemon_priming(executor)?;

        for i in 0..self.snaps.len() {
            self.phase_user_snap(executor, i, reporter)?;
        }

        self.phase_finalise(executor)
    }

    /// Strict subset for reattaching to an already-configured instance.
    pub fn warmup(&mut self, executor: &mut dyn Executor, reporter: &mut dyn Reporter) -> Result<()> {
        self.phase_compatibility_gate(executor)?;
        self.phase_os_gate(executor)?;

        let config = instance_config::read(executor)?
            .ok_or_else(|| Error::compatibility("instance has no configuration to warm up from"))?;
        if config.setup != Some(true) {
            return Err(Error::compatibility("instance setup was never completed"));
        }

        reporter.report(Event::PhaseStarted { phase: "wait_for_system_ready" });
        self.wait_for_system_ready(executor)?;
        reporter.report(Event::PhaseCompleted { phase: "wait_for_system_ready" });

        reporter.report(Event::PhaseStarted { phase: "wait_for_network_ready" });
        self.wait_for_network_ready(executor)?;
        reporter.report(Event::PhaseCompleted { phase: "wait_for_network_ready" });

        self.reapply_snap_proxy(executor)?;
        self.hold_snap_refreshes(executor)
    }

    /// Narrow idempotent readiness wait, usable outside setup/warmup.
    pub fn wait_until_ready(&mut self, executor: &mut dyn Executor) -> Result<()> {
        self.wait_for_system_ready(executor)?;
        self.wait_for_network_ready(executor)
    }

    fn phase_compatibility_gate(&self, executor: &mut dyn Executor) -> Result<()> {
        if let Some(config) = instance_config::read(executor)? {
            if config.compatibility_tag != self.compatibility_tag {
                return Err(Error::compatibility(format!(
                    "instance compatibility tag {:?} does not match requested {:?}",
                    config.compatibility_tag, self.compatibility_tag
                )));
            }
        }
        Ok(())
    }

    fn phase_os_gate(&self, executor: &mut dyn Executor) -> Result<()> {
        let out = executor.execute_run(&CommandSpec::new(["cat", "/etc/os-release"]))?;
        let release = parse_os_release(&out.stdout);
        let info = self.alias.info();

        let id_matches = release.get("ID").map(String::as_str) == Some(info.os_id);
        let version_matches =
            info.is_devel || release.get("VERSION_ID").map(String::as_str) == Some(info.os_version);

        if !id_matches || !version_matches {
            return Err(Error::compatibility(format!(
                "instance OS {:?} does not match requested base {} {}",
                release, info.os_id, info.os_version
            )));
        }
        Ok(())
    }

    fn phase_mark_in_progress(&self, executor: &mut dyn Executor) -> Result<()> {
        instance_config::update(
            executor,
            InstanceConfigPatch::tag(self.compatibility_tag.clone()).with_setup(false),
        )
        .map(|_| ())?;
        write_status(executor, ProviderStatus::Starting, OffsetDateTime::now_utc())
    }

    fn wait_for_system_ready(&self, executor: &mut dyn Executor) -> Result<()> {
        retry_until_timeout(
            SYSTEM_READY_TIMEOUT,
            SYSTEM_READY_INTERVAL,
            |_elapsed| {
                let out = executor.execute_run(&CommandSpec::new(["systemctl", "is-system-running"]).no_check())?;
                let state = out.stdout.trim();
                if state == "running" || state == "degraded" {
                    Ok(())
                } else {
                    Err(Error::backend(format!("init manager reports state {state:?}"), None))
                }
            },
            Some(Error::backend("timed out waiting for the instance's init manager to become ready", None)),
        )
    }

    fn phase_environment_file(&self, executor: &mut dyn Executor) -> Result<()> {
        let mut combined: BTreeMap<String, Option<String>> = BTreeMap::new();
        for (key, value) in self.alias.info().default_environment.into_iter().chain(self.environment.clone()) {
            combined.insert(key, value);
        }
        let rendered: String = combined
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| format!("{key}=\"{v}\"\n")))
            .collect();
        executor.push_file_io("/etc/environment", rendered.as_bytes(), 0o644, "root", "root")?;

        if self.alias.info().os_id == "ubuntu" {
            executor.push_file_io(
                "/etc/apt/apt.conf.d/20auto-upgrades",
                b"APT::Periodic::Update-Package-Lists \"10000\";\nAPT::Periodic::Unattended-Upgrade \"0\";\n",
                0o644,
                "root",
                "root",
            )?;
            executor.push_file_io(
                "/etc/apt/apt.conf.d/00no-recommends",
                b"APT::Install-Recommends \"false\";\n",
                0o644,
                "root",
                "root",
            )?;
            executor.push_file_io(
                "/etc/apt/apt.conf.d/00update-errors",
                b"APT::Update::Error-Mode \"any\";\n",
                0o644,
                "root",
                "root",
            )?;
        }
        Ok(())
    }

    fn phase_persist_tag(&self, executor: &mut dyn Executor) -> Result<()> {
        instance_config::write(executor, &super::instance_config::InstanceConfig::new(self.compatibility_tag.clone()))
    }

    fn phase_hostname(&self, executor: &mut dyn Executor) -> Result<()> {
        let normalised = super::hostname::normalise_hostname(&self.hostname)?;
        executor.push_file_io(
            "/etc/hostname",
            format!("{normalised}\n").as_bytes(),
            0o644,
            "root",
            "root",
        )?;
        self.run_checked(executor, CommandSpec::new(["hostname", normalised.as_str()]))
    }

    fn phase_networking(&self, executor: &mut dyn Executor) -> Result<()> {
        let unit = "[Match]\nName=eth0\n\n[Network]\nDHCP=ipv4\nLinkLocalAddressing=ipv6\n\n[DHCP]\nRouteMetric=100\nUseMTU=true\n";
        executor.push_file_io("/etc/systemd/network/10-eth0.network", unit.as_bytes(), 0o644, "root", "root")?;
        self.run_checked(executor, CommandSpec::new(["systemctl", "enable", "--now", "systemd-networkd"]))?;
        self.run_checked(executor, CommandSpec::new(["systemctl", "restart", "systemd-networkd"]))?;
        self.run_checked(
            executor,
            CommandSpec::new(["ln", "-sf", "/run/systemd/resolve/stub-resolv.conf", "/etc/resolv.conf"]),
        )?;
        self.run_checked(executor, CommandSpec::new(["systemctl", "restart", "systemd-resolved"]))
    }

    fn wait_for_network_ready(&self, executor: &mut dyn Executor) -> Result<()> {
        retry_until_timeout(
            NETWORK_READY_TIMEOUT,
            NETWORK_READY_INTERVAL,
            |_elapsed| {
                let out = executor
                    .execute_run(&CommandSpec::new(["getent", "hosts", "snapcraft.io"]).no_check())?;
                if out.success() {
                    Ok(())
                } else {
                    Err(Error::backend("resolver did not answer for the well-known hostname", None))
                }
            },
            Some(Error::Network),
        )
    }

    fn phase_package_priming(&self, executor: &mut dyn Executor) -> Result<()> {
        self.package_manager.update(executor)?;

        let mut packages = if self.use_default_packages {
            self.alias.info().default_packages
        } else {
            Vec::new()
        };
        for pkg in &self.packages {
            if !packages.contains(pkg) {
                packages.push(pkg.clone());
            }
        }

        if let Some(cache) = &self.cache_path {
            let target = "/var/cache/apt/archives";
            let host_source = format!("{cache}/{}/{:?}/apt", self.compatibility_tag, self.alias);
            executor.mount(&crate::executor::Mount::new(host_source, target))?;
        }

        self.package_manager.install(executor, &packages)?;
        self.package_manager.autoremove(executor)?;
        self.package_manager.clean(executor)
    }

    fn phase_snap_daemon_priming(&self, executor: &mut dyn Executor) -> Result<()> {
        self.run_checked(executor, CommandSpec::new(["systemctl", "enable", "--now", "systemd-udevd"]))?;
        self.run_checked_verify_network(
            executor,
            CommandSpec::new(["apt-get", "install", "-y", "snapd"]).with_timeout(Duration::from_secs(300)),
        )?;
        self.run_checked(executor, CommandSpec::new(["systemctl", "enable", "--now", "snapd.socket"]))?;
        self.run_checked(executor, CommandSpec::new(["systemctl", "restart", "snapd.service"]))?;
        retry_until_timeout(
            Duration::from_secs(60),
            Duration::from_secs(1),
            |_elapsed| {
                let out = executor.execute_run(&CommandSpec::new(["snap", "wait", "system", "seed.loaded"]).no_check())?;
                if out.success() {
                    Ok(())
                } else {
                    Err(Error::backend("snap seed has not finished loading", None))
                }
            },
            Some(Error::backend("timed out waiting for the snap seed to load", None)),
        )?;
        self.hold_snap_refreshes(executor)?;
        self.reapply_snap_proxy(executor)
    }

    fn hold_snap_refreshes(&self, executor: &mut dyn Executor) -> Result<()> {
        self.run_checked(executor, CommandSpec::new(["snap", "refresh", "--hold"]))
    }

    fn reapply_snap_proxy(&self, executor: &mut dyn Executor) -> Result<()> {
        for var in ["http_proxy", "https_proxy", "HTTPS_PROXY"] {
            if let Ok(value) = std::env::var(var) {
                let setting = if var.eq_ignore_ascii_case("https_proxy") { "proxy.https" } else { "proxy.http" };
                self.run_checked(
                    executor,
                    CommandSpec::new(["snap", "set", "system", format!("{setting}={value}").as_str()]),
                )?;
            }
        }
        Ok(())
    }

    fn phase_user_snap(&mut self, executor: &mut dyn Executor, index: usize, reporter: &mut dyn Reporter) -> Result<()> {
        let (name, channel, classic, from_host) = {
            let spec = &self.snaps[index];
            (spec.name.clone(), spec.channel.clone(), spec.classic, spec.from_host)
        };

        if from_host {
            let host = self
                .host_snapd
                .as_deref()
                .ok_or_else(|| Error::configuration(format!("snap {name:?} requested from host but no host snapd is configured")))?;
            snap_installer::inject_from_host(executor, host, &name, classic)?;
        } else {
            let channel = channel.unwrap_or_else(|| "stable".to_string());
            snap_installer::install_from_store(executor, &name, &channel, classic)?;
        }

        reporter.report(Event::SnapInstalled { name, revision: "unknown".to_string(), source: if from_host { "host" } else { "store" } });
        Ok(())
    }

    fn phase_finalise(&self, executor: &mut dyn Executor) -> Result<()> {
        instance_config::update(executor, InstanceConfigPatch::tag(self.compatibility_tag.clone()).with_setup(true))
            .map(|_| ())?;
        write_status(executor, ProviderStatus::Finished, OffsetDateTime::now_utc())
    }
}

fn parse_os_release(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}
