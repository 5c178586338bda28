//! A demo [`Provider`] backed by [`LocalExecutor`] scratch directories under
//! a single root. Snapshot publish/reuse is intentionally unsupported here;
//! it exists as a template for a real backend's equivalent, not as one.

use std::path::PathBuf;

use crate::core::provider::{Provider, RemoteImage};
use crate::error::{Error, Result};
use crate::executor::Executor;

use super::local::LocalExecutor;

pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn instance_dir(&self, name: &str) -> PathBuf {
        self.root.join("instances").join(name)
    }
}

impl Provider for LocalProvider {
    fn is_installed(&self) -> Result<bool> {
        Ok(true)
    }

    fn install(&mut self) -> Result<()> {
        Ok(())
    }

    fn exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.instance_dir(name).is_dir())
    }

    fn launch(&mut self, name: &str, _image: &RemoteImage) -> Result<Box<dyn Executor>> {
        Ok(Box::new(LocalExecutor::new(self.instance_dir(name))?))
    }

    fn create_environment(&mut self, name: &str) -> Result<Box<dyn Executor>> {
        Ok(Box::new(LocalExecutor::new(self.instance_dir(name))?))
    }

    fn delete(&mut self, name: &str, _force: bool) -> Result<()> {
        let dir = self.instance_dir(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|err| Error::Io { path: dir, source: err })?;
        }
        Ok(())
    }

    fn snapshot_exists(&mut self, _image_name: &str) -> Result<bool> {
        Ok(false)
    }

    fn publish_snapshot(&mut self, _executor: &mut dyn Executor, _image_name: &str) -> Result<()> {
        Ok(())
    }

    fn launch_from_snapshot(&mut self, _name: &str, _image_name: &str) -> Result<Box<dyn Executor>> {
        Err(Error::backend("the local demo backend does not support snapshots", None))
    }
}
