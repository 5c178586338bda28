//! The top-level orchestration state machine: given a `Provider` backend and
//! a `Base` specification, get from "maybe nothing exists yet" to "a ready,
//! scoped instance handle" (spec component C6).

use time::OffsetDateTime;

use crate::diagnostics::Reporter;
use crate::error::{Error, Result};
use crate::executor::Executor;

use super::base::Base;
use super::instance_config;
use super::provider::{compatibility_image, read_status, snapshot_image_name, write_status, Provider, ProviderStatus};

/// Drives one backend. Generic rather than a trait object because most
/// programs use exactly one backend for their whole lifetime and the static
/// dispatch avoids boxing every call.
pub struct ProviderEngine<P: Provider> {
    provider: P,
}

impl<P: Provider> ProviderEngine<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Install the backend if missing, then nothing further: per-instance
    /// readiness is the Base pipeline's job, not the Provider's.
    pub fn ensure_provider_is_available(&mut self) -> Result<()> {
        if !self.provider.is_installed()? {
            self.provider.install()?;
        }
        Ok(())
    }

    /// Returns a handle usable for destruction; does not start or
    /// configure anything.
    pub fn create_environment(&mut self, name: &str) -> Result<Box<dyn Executor>> {
        self.provider.create_environment(name)
    }

    /// Tolerant destroy: a no-op when the backend isn't installed or the
    /// instance doesn't exist.
    pub fn clean_project_environments(&mut self, name: &str) -> Result<()> {
        if !self.provider.is_installed()? {
            return Ok(());
        }
        match self.provider.exists(name) {
            Ok(true) => self.provider.delete(name, true),
            Ok(false) => Ok(()),
            Err(_) => Ok(()),
        }
    }

    /// The primary entry point: runs the state machine in spec.md §4.6 and
    /// returns a scoped [`LaunchedEnvironment`] guaranteed ready on success.
    pub fn launched_environment(
        &mut self,
        base: &mut Base,
        name: &str,
        allow_unstable: bool,
        auto_clean: bool,
        ephemeral: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<LaunchedEnvironment> {
        self.ensure_provider_is_available()?;

        let image = compatibility_image(base.alias);
        if !image.is_stable && !allow_unstable {
            return Err(Error::UnstableImage {
                brief: format!("image {:?} for remote {:?} is not marked stable", image.image_name, image.remote_name),
            });
        }

        let snapshot_name = snapshot_image_name(&image.remote_name, &base.compatibility_tag, base.alias);
        let exists = self.provider.exists(name)?;

        let mut executor = if !exists {
            self.launch_fresh_or_from_snapshot(name, &snapshot_name, &image, base, reporter)?
        } else {
            let mut executor = self.provider.create_environment(name)?;
            if !executor.is_running()? {
                executor.start()?;
            }

            if let Some(status @ (ProviderStatus::Starting | ProviderStatus::Preparing)) = read_status(executor.as_mut())? {
                return Err(Error::SetupInProgress {
                    brief: format!("instance {name:?} reports status {status:?}; another setup may still be running"),
                });
            }

            match self.bring_up(executor.as_mut(), base, reporter) {
                Ok(()) => executor,
                Err(Error::BaseCompatibility { reason, details }) if auto_clean => {
                    drop(executor);
                    self.provider.delete(name, true)?;
                    let mut fresh = self.provider.launch(name, &image)?;
                    base.setup(fresh.as_mut(), reporter)
                        .map_err(|_| Error::BaseCompatibility { reason, details })?;
                    fresh
                }
                Err(err) => return Err(err),
            }
        };

        if !self.provider.snapshot_exists(&snapshot_name).unwrap_or(false) {
            let _ = self.provider.publish_snapshot(executor.as_mut(), &snapshot_name);
        }

        let _ = write_status(executor.as_mut(), ProviderStatus::InUse, OffsetDateTime::now_utc());

        Ok(LaunchedEnvironment { executor, ephemeral })
    }

    fn launch_fresh_or_from_snapshot(
        &mut self,
        name: &str,
        snapshot_name: &str,
        image: &super::provider::RemoteImage,
        base: &mut Base,
        reporter: &mut dyn Reporter,
    ) -> Result<Box<dyn Executor>> {
        if self.provider.snapshot_exists(snapshot_name)? {
            let mut executor = self.provider.launch_from_snapshot(name, snapshot_name)?;
            base.warmup(executor.as_mut(), reporter)?;
            Ok(executor)
        } else {
            let mut executor = self.provider.launch(name, image)?;
            base.setup(executor.as_mut(), reporter)?;
            Ok(executor)
        }
    }

    /// Decide, from the instance's own persisted state, whether reattaching
    /// should run the full setup pipeline or just the warmup subset.
    fn bring_up(&self, executor: &mut dyn Executor, base: &mut Base, reporter: &mut dyn Reporter) -> Result<()> {
        match instance_config::read(executor)? {
            Some(config) if config.setup == Some(true) => base.warmup(executor, reporter),
            _ => base.setup(executor, reporter),
        }
    }
}

/// A scoped, ready-to-use instance handle. On drop, unmounts everything and
/// stops the instance; deletes instead of stopping when `ephemeral` was
/// requested, so a disposable instance never outlives its scope. This is
/// the Rust analogue of a context-manager-as-scope resource.
pub struct LaunchedEnvironment {
    executor: Box<dyn Executor>,
    ephemeral: bool,
}

impl LaunchedEnvironment {
    pub fn executor(&mut self) -> &mut dyn Executor {
        self.executor.as_mut()
    }
}

impl Drop for LaunchedEnvironment {
    fn drop(&mut self) {
        let _ = self.executor.unmount_all();
        if self.ephemeral {
            let _ = self.executor.delete(true);
        } else {
            let _ = write_status(self.executor.as_mut(), ProviderStatus::Finished, OffsetDateTime::now_utc());
            let _ = self.executor.stop(0);
        }
    }
}
