//! End-to-end scenarios for the bring-up pipeline and orchestration engine,
//! driven entirely through the public API against in-memory test doubles.

mod support;

use provider_orchestrator::backends::mock::MockExecutor;
use provider_orchestrator::core::base::SnapSpec;
use provider_orchestrator::core::instance_config::{self, InstanceConfigPatch, SnapRecord, SnapSource};
use provider_orchestrator::core::provider::{self, ProviderStatus};
use provider_orchestrator::core::snap_installer::{self, HostSnapInfo, HostSnapd};
use provider_orchestrator::core::{Base, BaseAlias, Provider, ProviderEngine};
use provider_orchestrator::diagnostics::RecordingReporter;
use provider_orchestrator::error::{Error, Result};

use support::{ready_scripts, FakeProvider};

fn new_engine() -> ProviderEngine<FakeProvider> {
    ProviderEngine::new(FakeProvider::default())
}

#[test]
fn fresh_launch_with_a_stable_image_reaches_ready_and_publishes_a_snapshot() {
    let mut engine = new_engine();
    let mut base = Base::new(BaseAlias::Jammy, "demo");
    let mut reporter = RecordingReporter::default();

    let launched = engine.launched_environment(&mut base, "demo", false, true, false, &mut reporter).unwrap();
    drop(launched);

    assert!(engine.provider_mut().exists("demo").unwrap());
    assert!(!engine.provider_mut().snapshots.is_empty());

    let handle = engine.provider_mut().seeded("demo");
    let mut exec = handle.borrow_mut();
    let config = instance_config::read(&mut *exec).unwrap().unwrap();
    assert_eq!(config.setup, Some(true));
}

#[test]
fn reattaching_to_a_compatible_instance_warms_up_instead_of_reinstalling_snapd() {
    let mut engine = new_engine();
    let mut base = Base::new(BaseAlias::Jammy, "demo");
    let mut reporter = RecordingReporter::default();

    drop(engine.launched_environment(&mut base, "demo", false, true, false, &mut reporter).unwrap());

    let mut base2 = Base::new(BaseAlias::Jammy, "demo");
    drop(engine.launched_environment(&mut base2, "demo", false, true, false, &mut reporter).unwrap());

    let handle = engine.provider_mut().seeded("demo");
    let snapd_installs = handle.borrow().commands().iter().filter(|c| c.args.join(" ") == "apt-get install -y snapd").count();
    assert_eq!(snapd_installs, 1, "warmup must not repeat the snap daemon priming phase");
}

#[test]
fn incompatible_tag_with_auto_clean_deletes_and_relaunches() {
    let mut engine = new_engine();
    let mut base = Base::new(BaseAlias::Jammy, "demo");
    let mut reporter = RecordingReporter::default();
    drop(engine.launched_environment(&mut base, "demo", false, true, false, &mut reporter).unwrap());

    let mut other = Base::new(BaseAlias::Jammy, "demo");
    other.compatibility_tag = "ubuntu-99.99".to_string();

    let launched = engine.launched_environment(&mut other, "demo", false, true, false, &mut reporter).unwrap();
    drop(launched);

    let handle = engine.provider_mut().seeded("demo");
    let config = instance_config::read(&mut *handle.borrow_mut()).unwrap().unwrap();
    assert_eq!(config.compatibility_tag, "ubuntu-99.99");
}

#[test]
fn incompatible_tag_without_auto_clean_surfaces_a_compatibility_error() {
    let mut engine = new_engine();
    let mut base = Base::new(BaseAlias::Jammy, "demo");
    let mut reporter = RecordingReporter::default();
    drop(engine.launched_environment(&mut base, "demo", false, true, false, &mut reporter).unwrap());

    let mut other = Base::new(BaseAlias::Jammy, "demo");
    other.compatibility_tag = "ubuntu-99.99".to_string();

    let err = engine.launched_environment(&mut other, "demo", false, false, false, &mut reporter).unwrap_err();
    assert!(matches!(err, Error::BaseCompatibility { .. }));
}

struct FakeHostSnapd {
    info: HostSnapInfo,
    assertions_requested: std::cell::RefCell<u32>,
}

impl HostSnapd for FakeHostSnapd {
    fn snap_info(&self, _name: &str) -> Result<HostSnapInfo> {
        Ok(HostSnapInfo {
            id: self.info.id.clone(),
            revision: self.info.revision.clone(),
            publisher_id: self.info.publisher_id.clone(),
            base: self.info.base.clone(),
        })
    }
    fn fetch_snap_file(&self, _name: &str) -> Result<Vec<u8>> {
        Ok(b"snap-bytes".to_vec())
    }
    fn pack_snap(&self, _name: &str) -> Result<Vec<u8>> {
        Ok(b"packed-bytes".to_vec())
    }
    fn assertion(&self, _query: &[&str]) -> Result<Vec<u8>> {
        *self.assertions_requested.borrow_mut() += 1;
        Ok(b"assertion".to_vec())
    }
}

#[test]
fn snap_injection_is_a_no_op_when_host_and_instance_already_agree() {
    let mut exec = MockExecutor::new();
    instance_config::update(
        &mut exec,
        InstanceConfigPatch::tag("t").with_snap("hello", SnapRecord { revision: "42".into(), source: SnapSource::Host }),
    )
    .unwrap();

    let host = FakeHostSnapd {
        info: HostSnapInfo { id: "id".into(), revision: "42".into(), publisher_id: "pub".into(), base: None },
        assertions_requested: std::cell::RefCell::new(0),
    };

    snap_installer::inject_from_host(&mut exec, &host, "hello", false).unwrap();

    assert!(!exec.command_was_run("snap install"));
    assert_eq!(*host.assertions_requested.borrow(), 0);
}

#[test]
fn snap_injection_with_a_dangerous_revision_skips_assertions() {
    let mut exec = MockExecutor::new();
    let host = FakeHostSnapd {
        info: HostSnapInfo { id: "id".into(), revision: "x7".into(), publisher_id: "pub".into(), base: None },
        assertions_requested: std::cell::RefCell::new(0),
    };

    snap_installer::inject_from_host(&mut exec, &host, "hello", false).unwrap();

    assert_eq!(*host.assertions_requested.borrow(), 0);
    assert!(exec.command_was_run("--dangerous"));
}

#[test]
fn setup_snap_spec_from_host_routes_through_the_snap_installer() {
    let mut engine = new_engine();
    let mut base = Base::new(BaseAlias::Jammy, "demo");
    base.host_snapd = Some(Box::new(FakeHostSnapd {
        info: HostSnapInfo { id: "id".into(), revision: "99".into(), publisher_id: "pub".into(), base: None },
        assertions_requested: std::cell::RefCell::new(0),
    }));
    base.snaps.push(SnapSpec { name: "hello".to_string(), channel: None, classic: false, from_host: true });
    let mut reporter = RecordingReporter::default();

    drop(engine.launched_environment(&mut base, "demo", false, true, false, &mut reporter).unwrap());

    let handle = engine.provider_mut().seeded("demo");
    assert!(handle.borrow().command_was_run("snap install"));
}

#[test]
fn reattaching_while_the_status_heartbeat_still_reads_preparing_is_rejected() {
    let mut engine = new_engine();
    let mut base = Base::new(BaseAlias::Jammy, "demo");
    let mut reporter = RecordingReporter::default();
    drop(engine.launched_environment(&mut base, "demo", false, true, false, &mut reporter).unwrap());

    let handle = engine.provider_mut().seeded("demo");
    provider::write_status(&mut *handle.borrow_mut(), ProviderStatus::Preparing, time::macros::datetime!(2024-01-01 00:00:00 UTC)).unwrap();

    let mut other = Base::new(BaseAlias::Jammy, "demo");
    let err = engine.launched_environment(&mut other, "demo", false, true, false, &mut reporter).unwrap_err();
    assert!(matches!(err, Error::SetupInProgress { .. }));
}

#[test]
fn a_failed_command_with_network_actually_down_is_reported_as_a_network_error() {
    let mut exec = MockExecutor::new();
    ready_scripts(&mut exec);
    exec.script_fail(["apt-get", "install", "-y", "snapd"], 100, "could not resolve host");
    exec.script_fail(["timeout", "5", "bash", "-c", "echo > /dev/tcp/snapcraft.io/443"], 1, "connection refused");

    let mut base = Base::new(BaseAlias::Jammy, "demo");
    let mut reporter = RecordingReporter::default();
    let err = base.setup(&mut exec, &mut reporter).unwrap_err();
    assert!(matches!(err, Error::Network));
}

#[test]
fn a_failed_command_with_a_proxy_configured_skips_the_probe_and_keeps_the_original_error() {
    let mut exec = MockExecutor::new();
    ready_scripts(&mut exec);
    exec.script_fail(["apt-get", "install", "-y", "snapd"], 100, "package conflict");
    exec.script_ok(["timeout", "5", "bash", "-c", "echo > /dev/tcp/snapcraft.io/443"], "");

    let mut base = Base::new(BaseAlias::Jammy, "demo");
    let mut reporter = RecordingReporter::default();

    let err = temp_env::with_var("https_proxy", Some("http://proxy.example:3128"), || base.setup(&mut exec, &mut reporter).unwrap_err());
    assert!(matches!(err, Error::Backend { .. }));
    assert!(!exec.command_was_run("timeout"), "probe must be skipped entirely under a proxy");
}
