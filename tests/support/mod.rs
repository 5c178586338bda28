//! Shared test doubles for the end-to-end engine scenarios. Mirrors the
//! teacher's own pattern of keeping lightweight fakes alongside its
//! contract tests rather than reaching for a mocking framework.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use provider_orchestrator::backends::mock::MockExecutor;
use provider_orchestrator::core::provider::RemoteImage;
use provider_orchestrator::core::Provider;
use provider_orchestrator::error::{Error, Result};
use provider_orchestrator::executor::{CommandOutput, CommandSpec, Mount, ProcessHandle};
use provider_orchestrator::Executor;

/// Wraps a shared `MockExecutor` so the same backing instance survives a
/// `create_environment` call after a `launch`, the way a real backend's
/// instance persists across Provider calls.
pub struct SharedExecutor(pub Rc<RefCell<MockExecutor>>);

impl Executor for SharedExecutor {
    fn execute_run(&mut self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.0.borrow_mut().execute_run(spec)
    }
    fn execute_popen(&mut self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
        self.0.borrow_mut().execute_popen(spec)
    }
    fn push_file(&mut self, host_path: &str, dest_path: &str) -> Result<()> {
        self.0.borrow_mut().push_file(host_path, dest_path)
    }
    fn push_file_io(&mut self, dest_path: &str, content: &[u8], mode: u32, owner_user: &str, owner_group: &str) -> Result<()> {
        self.0.borrow_mut().push_file_io(dest_path, content, mode, owner_user, owner_group)
    }
    fn pull_file(&mut self, src_path: &str, host_path: &str) -> Result<()> {
        self.0.borrow_mut().pull_file(src_path, host_path)
    }
    fn mount(&mut self, mount: &Mount) -> Result<()> {
        self.0.borrow_mut().mount(mount)
    }
    fn unmount(&mut self, target: &str) -> Result<()> {
        self.0.borrow_mut().unmount(target)
    }
    fn unmount_all(&mut self) -> Result<()> {
        self.0.borrow_mut().unmount_all()
    }
    fn exists(&mut self) -> Result<bool> {
        self.0.borrow_mut().exists()
    }
    fn is_running(&mut self) -> Result<bool> {
        self.0.borrow_mut().is_running()
    }
    fn start(&mut self) -> Result<()> {
        self.0.borrow_mut().start()
    }
    fn stop(&mut self, delay_mins: u32) -> Result<()> {
        self.0.borrow_mut().stop(delay_mins)
    }
    fn delete(&mut self, force: bool) -> Result<()> {
        self.0.borrow_mut().delete(force)
    }
}

/// An in-memory [`Provider`] whose instances are shared [`MockExecutor`]s,
/// newly created (and pre-seeded for a successful bring-up) on `launch`.
#[derive(Default)]
pub struct FakeProvider {
    pub instances: BTreeMap<String, Rc<RefCell<MockExecutor>>>,
    pub snapshots: Vec<String>,
}

impl FakeProvider {
    pub fn seeded(&self, name: &str) -> Rc<RefCell<MockExecutor>> {
        self.instances.get(name).expect("instance must have been launched").clone()
    }
}

/// Scripts the instance reports that satisfy the full Base setup pipeline,
/// so tests that don't care about setup itself can get straight to ready.
pub fn ready_scripts(exec: &mut MockExecutor) {
    exec.seed_file("/etc/os-release", b"ID=ubuntu\nVERSION_ID=\"22.04\"\n".to_vec());
    exec.script_ok(["systemctl", "is-system-running"], "running");
    exec.script_ok(["getent", "hosts", "snapcraft.io"], "resolved");
    exec.script_ok(["snap", "wait", "system", "seed.loaded"], "");
}

impl Provider for FakeProvider {
    fn is_installed(&self) -> Result<bool> {
        Ok(true)
    }

    fn install(&mut self) -> Result<()> {
        Ok(())
    }

    fn exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.instances.contains_key(name))
    }

    fn launch(&mut self, name: &str, _image: &RemoteImage) -> Result<Box<dyn Executor>> {
        let mut mock = MockExecutor::new();
        ready_scripts(&mut mock);
        let handle = Rc::new(RefCell::new(mock));
        self.instances.insert(name.to_string(), handle.clone());
        Ok(Box::new(SharedExecutor(handle)))
    }

    fn create_environment(&mut self, name: &str) -> Result<Box<dyn Executor>> {
        let handle = self.instances.get(name).cloned().ok_or_else(|| Error::backend("no such instance", None))?;
        Ok(Box::new(SharedExecutor(handle)))
    }

    fn delete(&mut self, name: &str, _force: bool) -> Result<()> {
        self.instances.remove(name);
        Ok(())
    }

    fn snapshot_exists(&mut self, image_name: &str) -> Result<bool> {
        Ok(self.snapshots.iter().any(|s| s == image_name))
    }

    fn publish_snapshot(&mut self, _executor: &mut dyn Executor, image_name: &str) -> Result<()> {
        self.snapshots.push(image_name.to_string());
        Ok(())
    }

    fn launch_from_snapshot(&mut self, name: &str, _image_name: &str) -> Result<Box<dyn Executor>> {
        self.launch(name, &RemoteImage { remote_name: "release".into(), image_name: "snapshot".into(), is_stable: true })
    }
}
