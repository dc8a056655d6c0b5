//! Network applier
//!
//! The only component allowed to touch the live tunnel interface. It adds or
//! removes exactly one peer entry keyed by `(public_key, address)` and never
//! sees the peer store. Failures come back as values, not errors, so callers
//! have to branch on them.

use crate::config::{find_program, ApplierConfig, HELPER_PATH};
use async_trait::async_trait;
use parking_lot::Mutex;
use peergate_common::ExternalFailure;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Result of one external effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { output: String },
    Failed(ExternalFailure),
}

impl ApplyOutcome {
    pub fn failed(exit_status: Option<i32>, output: impl Into<String>) -> Self {
        Self::Failed(ExternalFailure {
            exit_status,
            output: output.into(),
        })
    }
}

/// Which side of the effect is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Add,
    Remove,
}

impl ApplyAction {
    fn verb(&self) -> &'static str {
        match self {
            Self::Add => "add-peer",
            Self::Remove => "remove-peer",
        }
    }
}

/// Capability to add or remove one peer on the live interface
#[async_trait]
pub trait NetworkApplier: Send + Sync {
    async fn apply_create(&self, public_key: &str, address: &str) -> ApplyOutcome;

    async fn apply_delete(&self, public_key: &str, address: &str) -> ApplyOutcome;
}

// ============================================================================
// Privileged helper implementation
// ============================================================================

/// Runs the locally trusted helper as
/// `<helper> add-peer|remove-peer <public_key> <address>`
pub struct HelperApplier {
    helper: PathBuf,
    /// Resolved `sudo` when the helper runs through it
    sudo: Option<PathBuf>,
    interface: String,
    wan_interface: Option<String>,
    timeout: Duration,
}

impl HelperApplier {
    /// Build from validated config; presence of the helper and `sudo` is
    /// checked by `ServerConfig::validate` at startup.
    pub fn new(config: &ApplierConfig) -> Self {
        let sudo = config
            .use_sudo
            .then(|| find_program("sudo").unwrap_or_else(|_| PathBuf::from("sudo")));
        Self {
            helper: config.helper.clone(),
            sudo,
            interface: config.interface.clone(),
            wan_interface: config.wan_interface.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn command(&self, action: ApplyAction, public_key: &str, address: &str) -> Command {
        let mut cmd = if let Some(sudo) = &self.sudo {
            let mut cmd = Command::new(sudo);
            cmd.arg("-n").arg(&self.helper);
            cmd
        } else {
            Command::new(&self.helper)
        };

        cmd.arg(action.verb())
            .arg(public_key)
            .arg(address)
            .env_clear()
            .env("PATH", HELPER_PATH)
            .env("WG_IF", &self.interface)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(wan) = &self.wan_interface {
            cmd.env("WAN_IF", wan);
        }
        cmd
    }

    async fn run(&self, action: ApplyAction, public_key: &str, address: &str) -> ApplyOutcome {
        let child = match self.command(action, public_key, address).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn helper {}: {}", self.helper.display(), e);
                return ApplyOutcome::failed(None, format!("spawn failed: {}", e));
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Helper {} for {} failed: {}", action.verb(), address, e);
                return ApplyOutcome::failed(None, format!("wait failed: {}", e));
            }
            Err(_) => {
                warn!(
                    "Helper {} for {} timed out after {:?}",
                    action.verb(),
                    address,
                    self.timeout
                );
                return ApplyOutcome::failed(
                    None,
                    format!("timed out after {}s", self.timeout.as_secs()),
                );
            }
        };

        let captured = combine_output(&output.stdout, &output.stderr);
        if output.status.success() {
            info!("Helper {} applied for {}", action.verb(), address);
            if !captured.is_empty() {
                debug!("Helper output: {}", captured.trim_end());
            }
            ApplyOutcome::Applied { output: captured }
        } else {
            warn!(
                "Helper {} for {} exited with {:?}",
                action.verb(),
                address,
                output.status.code()
            );
            ApplyOutcome::failed(output.status.code(), captured)
        }
    }
}

#[async_trait]
impl NetworkApplier for HelperApplier {
    async fn apply_create(&self, public_key: &str, address: &str) -> ApplyOutcome {
        self.run(ApplyAction::Add, public_key, address).await
    }

    async fn apply_delete(&self, public_key: &str, address: &str) -> ApplyOutcome {
        self.run(ApplyAction::Remove, public_key, address).await
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut out = String::from_utf8_lossy(stdout).into_owned();
    let err = String::from_utf8_lossy(stderr);
    if !err.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&err);
    }
    out
}

// ============================================================================
// Recording implementation (tests, dry runs)
// ============================================================================

/// A call observed by `RecordingApplier`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCall {
    pub action: ApplyAction,
    pub public_key: String,
    pub address: String,
}

/// Records every call and answers with scripted outcomes, falling back to
/// success once the script for an action is used up.
#[derive(Default)]
pub struct RecordingApplier {
    calls: Mutex<Vec<AppliedCall>>,
    create_script: Mutex<VecDeque<ApplyOutcome>>,
    delete_script: Mutex<VecDeque<ApplyOutcome>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_create(&self, outcome: ApplyOutcome) {
        self.create_script.lock().push_back(outcome);
    }

    pub fn script_delete(&self, outcome: ApplyOutcome) {
        self.delete_script.lock().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<AppliedCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, action: ApplyAction) -> usize {
        self.calls.lock().iter().filter(|c| c.action == action).count()
    }

    fn record(&self, action: ApplyAction, public_key: &str, address: &str) -> ApplyOutcome {
        self.calls.lock().push(AppliedCall {
            action,
            public_key: public_key.to_string(),
            address: address.to_string(),
        });
        let script = match action {
            ApplyAction::Add => &self.create_script,
            ApplyAction::Remove => &self.delete_script,
        };
        script.lock().pop_front().unwrap_or(ApplyOutcome::Applied {
            output: String::new(),
        })
    }
}

#[async_trait]
impl NetworkApplier for RecordingApplier {
    async fn apply_create(&self, public_key: &str, address: &str) -> ApplyOutcome {
        self.record(ApplyAction::Add, public_key, address)
    }

    async fn apply_delete(&self, public_key: &str, address: &str) -> ApplyOutcome {
        self.record(ApplyAction::Remove, public_key, address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper(path: &str) -> HelperApplier {
        HelperApplier::new(&ApplierConfig {
            helper: PathBuf::from(path),
            ..ApplierConfig::default()
        })
    }

    #[test]
    fn test_combine_output() {
        assert_eq!(combine_output(b"ok", b""), "ok");
        assert_eq!(combine_output(b"ok", b"warn"), "ok\nwarn");
        assert_eq!(combine_output(b"", b"boom\n"), "boom\n");
    }

    #[tokio::test]
    async fn test_recording_applier_scripts() {
        let applier = RecordingApplier::new();
        applier.script_create(ApplyOutcome::failed(Some(1), "no such device"));

        let first = applier.apply_create("key", "fd00:1::1").await;
        assert_eq!(first, ApplyOutcome::failed(Some(1), "no such device"));

        let second = applier.apply_create("key", "fd00:1::1").await;
        assert!(matches!(second, ApplyOutcome::Applied { .. }));

        applier.apply_delete("key", "fd00:1::1").await;
        assert_eq!(applier.count(ApplyAction::Add), 2);
        assert_eq!(applier.count(ApplyAction::Remove), 1);
        assert_eq!(applier.calls()[2].action, ApplyAction::Remove);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_passes_verb_and_arguments() {
        let applier = helper("/bin/echo");
        let outcome = applier.apply_create("KEY=", "fd00:1::2").await;
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                output: "add-peer KEY= fd00:1::2\n".to_string()
            }
        );

        let outcome = applier.apply_delete("KEY=", "fd00:1::2").await;
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                output: "remove-peer KEY= fd00:1::2\n".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_nonzero_exit_is_failure() {
        let applier = helper("/bin/false");
        match applier.apply_create("KEY=", "fd00:1::2").await {
            ApplyOutcome::Failed(failure) => assert_eq!(failure.exit_status, Some(1)),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_helper_is_failure() {
        let applier = helper("/nonexistent/peergate-helper");
        match applier.apply_delete("KEY=", "fd00:1::2").await {
            ApplyOutcome::Failed(failure) => {
                assert_eq!(failure.exit_status, None);
                assert!(failure.output.starts_with("spawn failed"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
