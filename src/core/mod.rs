//! The orchestration engine's internals: everything that runs independent
//! of any concrete backend.

pub mod base;
pub mod engine;
pub mod hostname;
pub mod instance_config;
pub mod network_probe;
pub mod pro;
pub mod provider;
pub mod retry;
pub mod snap_installer;

pub use base::{AptPackageManager, Base, BaseAlias, BaseAliasInfo, PackageManager, SnapSpec};
pub use engine::{LaunchedEnvironment, ProviderEngine};
pub use hostname::{normalise_hostname, normalise_hostname_unique};
pub use instance_config::{InstanceConfig, InstanceConfigPatch};
pub use network_probe::{probe_reachable, ReachabilityTarget};
pub use provider::{compatibility_image, Provider, ProviderStatus, RemoteImage};
pub use retry::retry_until_timeout;
pub use snap_installer::{HostSnapd, HostSnapInfo};
