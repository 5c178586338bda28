//! Ubuntu Pro entitlement tokens: read the host's machine token and attempt
//! to upgrade it to a short-lived guest token, always falling back to the
//! machine token on any failure (spec component C10, supplemented from
//! `craft_providers/pro.py`; underspecified in spec.md §4).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::diagnostics::{Diagnostic, Event, Reporter};
use crate::error::{Error, Result};
use crate::executor::Executor;

const MACHINE_TOKEN_PATH: &str = "/var/lib/ubuntu-advantage/private/machine-token.json";
const CONTRACTS_BASE_URL: &str = "https://contracts.canonical.com";
const GUEST_TOKEN_ENDPOINT: &str = "/v1/guest/token";
const GUEST_TOKEN_TIMEOUT_SECS: u64 = 15;
const PRO_TOKEN_PATH: &str = "/etc/ubuntu-advantage/pro-token";

#[derive(Debug, Deserialize)]
struct MachineTokenFile {
    #[serde(rename = "machineToken", default)]
    machine_token: String,
}

#[derive(Debug, Deserialize)]
struct GuestTokenResponse {
    #[serde(rename = "guestToken", default)]
    guest_token: String,
}

/// Read the on-host Ubuntu Pro machine token.
pub fn retrieve_pro_host_token() -> Result<String> {
    retrieve_pro_host_token_at(Path::new(MACHINE_TOKEN_PATH))
}

fn retrieve_pro_host_token_at(token_file: &Path) -> Result<String> {
    let content = std::fs::read_to_string(token_file).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => Error::MachineToken { brief: "Machine token file does not exist.".to_string() },
        std::io::ErrorKind::PermissionDenied => {
            Error::MachineToken { brief: "Machine token file is not accessible. Make sure you are running with root access.".to_string() }
        }
        _ => Error::Io { path: token_file.to_path_buf(), source: err },
    })?;

    let parsed: MachineTokenFile = serde_json::from_str(&content)
        .map_err(|_| Error::MachineToken { brief: "Machine token file does not contain valid JSON.".to_string() })?;

    if parsed.machine_token.is_empty() {
        return Err(Error::MachineToken { brief: "No token in machine token file.".to_string() });
    }
    Ok(parsed.machine_token)
}

/// Abstracts the contracts-API HTTP call so the guest-token upgrade is
/// testable without reaching the real service.
pub trait EntitlementClient {
    fn request_guest_token(&self, machine_token: &str) -> Result<String>;
}

/// Real implementation backed by `ureq`.
pub struct UreqEntitlementClient;

impl EntitlementClient for UreqEntitlementClient {
    fn request_guest_token(&self, machine_token: &str) -> Result<String> {
        let url = format!("{CONTRACTS_BASE_URL}{GUEST_TOKEN_ENDPOINT}");
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(GUEST_TOKEN_TIMEOUT_SECS))
            .build();

        let response = agent
            .get(&url)
            .set("Authorization", &format!("Bearer {machine_token}"))
            .call()
            .map_err(|_| Error::Network)?;

        if response.status() != 200 {
            return Err(Error::configuration(format!("contracts API returned status {}", response.status())));
        }

        let body: GuestTokenResponse = response
            .into_json()
            .map_err(|err| Error::configuration(format!("could not decode guest token response: {err}")))?;

        if body.guest_token.is_empty() {
            return Err(Error::configuration("guest token response did not contain a token"));
        }
        Ok(body.guest_token)
    }
}

/// Upgrade `machine_token` to a guest token, always falling back to
/// `machine_token` itself when the upgrade fails for any reason: non-200
/// status, malformed JSON, an empty `guestToken` field, or a
/// transport-level error.
pub fn request_pro_guest_token(machine_token: &str, client: &dyn EntitlementClient, reporter: &mut dyn Reporter) -> Result<String> {
    match client.request_guest_token(machine_token) {
        Ok(guest_token) => Ok(guest_token),
        Err(_) => {
            reporter.report(Event::Message {
                diagnostic: Diagnostic::info("could not obtain a guest token, falling back to the machine token"),
            });
            Ok(machine_token.to_string())
        }
    }
}

/// Read the host's machine token, attempt the guest-token upgrade, and
/// persist whichever token wins to the instance for Pro-aware tooling
/// inside it to pick up. The real call site for [`request_pro_guest_token`],
/// gated behind the CLI's `--pro` flag.
pub fn enable_pro(executor: &mut dyn Executor, client: &dyn EntitlementClient, reporter: &mut dyn Reporter) -> Result<()> {
    let machine_token = retrieve_pro_host_token()?;
    let token = request_pro_guest_token(&machine_token, client, reporter)?;
    executor.push_file_io(PRO_TOKEN_PATH, token.as_bytes(), 0o600, "root", "root")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RecordingReporter;
    use std::io::Write;

    fn write_token_file(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("machine-token.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    struct AlwaysFails;
    impl EntitlementClient for AlwaysFails {
        fn request_guest_token(&self, _machine_token: &str) -> Result<String> {
            Err(Error::Network)
        }
    }

    struct AlwaysSucceeds(&'static str);
    impl EntitlementClient for AlwaysSucceeds {
        fn request_guest_token(&self, _machine_token: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn host_token_missing_file_is_a_machine_token_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = retrieve_pro_host_token_at(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::MachineToken { .. }));
    }

    #[test]
    fn host_token_empty_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_token_file(&dir, r#"{"machineToken": ""}"#);
        let err = retrieve_pro_host_token_at(&path).unwrap_err();
        assert!(matches!(err, Error::MachineToken { .. }));
    }

    #[test]
    fn host_token_reads_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_token_file(&dir, r#"{"machineToken": "abc123"}"#);
        assert_eq!(retrieve_pro_host_token_at(&path).unwrap(), "abc123");
    }

    #[test]
    fn guest_token_falls_back_to_machine_token_on_failure() {
        let client = AlwaysFails;
        let mut reporter = RecordingReporter::default();
        let token = request_pro_guest_token("the-machine-token", &client, &mut reporter).unwrap();
        assert_eq!(token, "the-machine-token");
        assert_eq!(reporter.events.len(), 1, "the fallback must be reported");
    }

    #[test]
    fn guest_token_used_when_upgrade_succeeds() {
        let client = AlwaysSucceeds("guest-xyz");
        let mut reporter = RecordingReporter::default();
        let token = request_pro_guest_token("m", &client, &mut reporter).unwrap();
        assert_eq!(token, "guest-xyz");
        assert!(reporter.events.is_empty(), "a successful upgrade reports nothing");
    }

    #[test]
    fn winning_token_is_written_to_the_instance_at_the_expected_path_and_mode() {
        // Mirrors the second half of enable_pro's body: retrieving the host
        // machine token itself is covered separately above, since the real
        // path it reads from won't exist in the test sandbox.
        let mut exec = crate::backends::mock::MockExecutor::new();
        let client = AlwaysSucceeds("guest-xyz");
        let mut reporter = RecordingReporter::default();

        let token = request_pro_guest_token("host-token", &client, &mut reporter).unwrap();
        exec.push_file_io(PRO_TOKEN_PATH, token.as_bytes(), 0o600, "root", "root").unwrap();

        assert_eq!(exec.file_contents(PRO_TOKEN_PATH), Some("guest-xyz".as_bytes()));
        assert_eq!(exec.file_mode(PRO_TOKEN_PATH), Some(0o600));
    }
}
