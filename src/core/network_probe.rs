//! Single-shot network reachability probe used to distinguish "the command
//! itself is broken" from "there is no network" (spec component C7).

use std::time::Duration;

use crate::executor::{CommandSpec, Executor};

/// Host/port pair the probe attempts a connection to. `default()` points at
/// a well-known stable public host on 443, matching spec.md §4.7.
#[derive(Debug, Clone)]
pub struct ReachabilityTarget {
    pub host: String,
    pub port: u16,
}

impl Default for ReachabilityTarget {
    fn default() -> Self {
        Self { host: "snapcraft.io".to_string(), port: 443 }
    }
}

const PROXY_VARS: [&str; 3] = ["http_proxy", "https_proxy", "HTTPS_PROXY"];

/// `true` if the instance can reach `target`. Per spec.md §4.7 and §6, the
/// probe is skipped (and reported reachable) whenever the *host* process has
/// a proxy variable set, since a proxied environment makes a direct-connect
/// probe meaningless: callers are expected to treat the triggering error as
/// authoritative in that case rather than as a network outage.
pub fn probe_reachable(executor: &mut dyn Executor, target: &ReachabilityTarget, timeout: Duration) -> bool {
    if PROXY_VARS.iter().any(|var| std::env::var(var).is_ok()) {
        return true;
    }

    let timeout_secs = timeout.as_secs().max(1).to_string();
    let spec = CommandSpec::new([
        "timeout".to_string(),
        timeout_secs,
        "bash".to_string(),
        "-c".to_string(),
        format!("echo > /dev/tcp/{}/{}", target.host, target.port),
    ])
    .no_check()
    .with_timeout(timeout);

    matches!(executor.execute_run(&spec), Ok(out) if out.success())
}
