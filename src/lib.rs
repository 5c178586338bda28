//! A pluggable library for bringing up a fresh or reattached instance
//! (container or VM, depending on the backend) to a known-ready state:
//! launch/reattach, OS and compatibility checks, package and snap bring-up,
//! and a scoped handle that tears itself down on drop.

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod executor;

pub use core::{Base, BaseAlias, LaunchedEnvironment, Provider, ProviderEngine};
pub use error::{Error, Result};
pub use executor::{CommandOutput, CommandSpec, Executor, Mount, ProcessHandle};
