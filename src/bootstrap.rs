//! Per-instance bootstrap sequencer.
//!
//! Threads a fixed step order per instance — connect, install runtime, push
//! artifact, build image, start container, verify liveness — applying a
//! step-specific retry policy to each, and produces exactly one
//! [`BootstrapOutcome`]. Session-scoped steps share one session per attempt;
//! the session is torn down before liveness verification, which runs over
//! the application's own port rather than the shell.

use crate::archive::Artifact;
use crate::commands::RemoteCommand;
use crate::error::BootstrapError;
use crate::probe::LivenessProbe;
use crate::retry::{with_retry, RetryPolicy};
use crate::ssh::{RemoteSession, RemoteShell};
use std::fmt;
use tracing::info;

/// Handle to a provisioned, running compute node.
///
/// Created by provisioning before the bootstrap runs; read-only here.
#[derive(Debug, Clone)]
pub struct FleetInstance {
    pub instance_id: String,
    pub public_addr: String,
    /// Position within the batch; the deployed app receives `ordinal + 1`.
    pub ordinal: u32,
}

/// Steps of the bootstrap state machine, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    Connecting,
    InstallingRuntime,
    PushingArtifact,
    BuildingImage,
    StartingContainer,
    VerifyingLiveness,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapStage::Connecting => "connecting",
            BootstrapStage::InstallingRuntime => "installing runtime",
            BootstrapStage::PushingArtifact => "pushing artifact",
            BootstrapStage::BuildingImage => "building image",
            BootstrapStage::StartingContainer => "starting container",
            BootstrapStage::VerifyingLiveness => "verifying liveness",
        };
        f.write_str(name)
    }
}

/// Terminal result for one instance, produced exactly once
#[derive(Debug)]
pub enum BootstrapOutcome {
    Ready {
        instance_id: String,
    },
    Failed {
        instance_id: String,
        stage: BootstrapStage,
        error: BootstrapError,
    },
}

impl BootstrapOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootstrapOutcome::Ready { .. })
    }

    pub fn instance_id(&self) -> &str {
        match self {
            BootstrapOutcome::Ready { instance_id } => instance_id,
            BootstrapOutcome::Failed { instance_id, .. } => instance_id,
        }
    }
}

/// Per-step retry policies for one bootstrap run
#[derive(Debug, Clone)]
pub struct BootstrapPolicies {
    pub connect: RetryPolicy,
    pub remote_exec: RetryPolicy,
    pub probe: RetryPolicy,
}

impl Default for BootstrapPolicies {
    fn default() -> Self {
        Self {
            connect: RetryPolicy::connect(),
            remote_exec: RetryPolicy::remote_exec(),
            probe: RetryPolicy::probe(),
        }
    }
}

/// Run the full bootstrap sequence for one instance.
///
/// Never returns an error: every failure is folded into the instance's
/// [`BootstrapOutcome`] so one instance cannot disturb its siblings.
pub async fn bootstrap_instance(
    shell: &dyn RemoteShell,
    probe: &dyn LivenessProbe,
    artifact: &Artifact,
    instance: &FleetInstance,
    policies: &BootstrapPolicies,
) -> BootstrapOutcome {
    info!(
        instance_id = %instance.instance_id,
        addr = %instance.public_addr,
        ordinal = instance.ordinal,
        "Bootstrapping instance"
    );

    match run_sequence(shell, probe, artifact, instance, policies).await {
        Ok(()) => {
            info!(instance_id = %instance.instance_id, "Instance ready");
            BootstrapOutcome::Ready {
                instance_id: instance.instance_id.clone(),
            }
        }
        Err((stage, error)) => BootstrapOutcome::Failed {
            instance_id: instance.instance_id.clone(),
            stage,
            error,
        },
    }
}

async fn run_sequence(
    shell: &dyn RemoteShell,
    probe: &dyn LivenessProbe,
    artifact: &Artifact,
    instance: &FleetInstance,
    policies: &BootstrapPolicies,
) -> Result<(), (BootstrapStage, BootstrapError)> {
    let session = with_retry(
        &policies.connect,
        BootstrapError::is_connection_not_ready,
        "ssh connect",
        || shell.connect(&instance.public_addr),
    )
    .await
    .map_err(|e| (BootstrapStage::Connecting, e))?;

    // Session dropped (and the connection closed) before the probe runs,
    // whichever way the session-scoped steps exit.
    let result = run_session_steps(session.as_ref(), artifact, instance, policies).await;
    drop(session);
    result?;

    with_retry(
        &policies.probe,
        BootstrapError::is_probe,
        "liveness probe",
        || probe.probe(&instance.public_addr),
    )
    .await
    .map_err(|e| (BootstrapStage::VerifyingLiveness, e))?;

    Ok(())
}

async fn run_session_steps(
    session: &dyn RemoteSession,
    artifact: &Artifact,
    instance: &FleetInstance,
    policies: &BootstrapPolicies,
) -> Result<(), (BootstrapStage, BootstrapError)> {
    exec_with_retry(session, RemoteCommand::InstallRuntime, policies)
        .await
        .map_err(|e| (BootstrapStage::InstallingRuntime, e))?;

    // Not retried individually: a failed transfer is fatal for the instance.
    info!(instance_id = %instance.instance_id, "Pushing artifact");
    session
        .upload(&artifact.remote_name, &artifact.data)
        .await
        .map_err(|e| (BootstrapStage::PushingArtifact, e))?;

    exec_with_retry(session, RemoteCommand::BuildImage, policies)
        .await
        .map_err(|e| (BootstrapStage::BuildingImage, e))?;

    exec_with_retry(
        session,
        RemoteCommand::StartContainer {
            instance_number: instance.ordinal + 1,
        },
        policies,
    )
    .await
    .map_err(|e| (BootstrapStage::StartingContainer, e))?;

    Ok(())
}

async fn exec_with_retry(
    session: &dyn RemoteSession,
    command: RemoteCommand,
    policies: &BootstrapPolicies,
) -> Result<(), BootstrapError> {
    info!(step = command.name(), "Running remote command");
    let rendered = command.render();
    with_retry(
        &policies.remote_exec,
        BootstrapError::is_remote_exec,
        command.name(),
        || async {
            session.exec(&rendered).await?;
            Ok(())
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn fast_policies() -> BootstrapPolicies {
        let fast = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_elapsed: Duration::from_millis(200),
            jitter: 0.0,
        };
        BootstrapPolicies {
            connect: fast.clone(),
            remote_exec: fast.clone(),
            probe: fast,
        }
    }

    fn test_instance() -> FleetInstance {
        FleetInstance {
            instance_id: "i-0abc".into(),
            public_addr: "198.51.100.7".into(),
            ordinal: 2,
        }
    }

    fn test_artifact() -> Artifact {
        Artifact {
            remote_name: "src.tar.gz".into(),
            data: vec![1, 2, 3],
        }
    }

    type OpLog = Arc<Mutex<Vec<String>>>;

    struct RecordingShell {
        log: OpLog,
    }

    struct RecordingSession {
        log: OpLog,
    }

    #[async_trait]
    impl RemoteShell for RecordingShell {
        async fn connect(&self, addr: &str) -> Result<Box<dyn RemoteSession>, BootstrapError> {
            self.log.lock().unwrap().push(format!("connect {addr}"));
            Ok(Box::new(RecordingSession {
                log: self.log.clone(),
            }))
        }
    }

    #[async_trait]
    impl RemoteSession for RecordingSession {
        async fn exec(&self, cmd: &str) -> Result<String, BootstrapError> {
            self.log.lock().unwrap().push(format!("exec {cmd}"));
            Ok(String::new())
        }

        async fn upload(&self, remote_name: &str, data: &[u8]) -> Result<(), BootstrapError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("upload {remote_name} {}b", data.len()));
            Ok(())
        }
    }

    impl Drop for RecordingSession {
        fn drop(&mut self) {
            self.log.lock().unwrap().push("close".into());
        }
    }

    struct RecordingProbe {
        log: OpLog,
    }

    #[async_trait]
    impl LivenessProbe for RecordingProbe {
        async fn probe(&self, addr: &str) -> Result<(), BootstrapError> {
            self.log.lock().unwrap().push(format!("probe {addr}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn steps_run_in_order_and_session_closes_before_probe() {
        let log: OpLog = Arc::new(Mutex::new(Vec::new()));
        let shell = RecordingShell { log: log.clone() };
        let probe = RecordingProbe { log: log.clone() };

        let outcome = bootstrap_instance(
            &shell,
            &probe,
            &test_artifact(),
            &test_instance(),
            &fast_policies(),
        )
        .await;

        assert!(outcome.is_ready());
        assert_eq!(outcome.instance_id(), "i-0abc");

        let ops = log.lock().unwrap().clone();
        assert_eq!(ops.len(), 7, "unexpected ops: {ops:?}");
        assert_eq!(ops[0], "connect 198.51.100.7");
        assert!(ops[1].starts_with("exec") && ops[1].contains("snap install docker"));
        assert_eq!(ops[2], "upload src.tar.gz 3b");
        assert!(ops[3].contains("docker build"));
        // Ordinal 2 becomes instance number 3
        assert!(ops[4].contains("INSTANCE_NUMBER=3"));
        assert_eq!(ops[5], "close");
        assert_eq!(ops[6], "probe 198.51.100.7");
    }

    struct FailingUploadShell {
        log: OpLog,
    }

    struct FailingUploadSession {
        log: OpLog,
    }

    #[async_trait]
    impl RemoteShell for FailingUploadShell {
        async fn connect(&self, _addr: &str) -> Result<Box<dyn RemoteSession>, BootstrapError> {
            Ok(Box::new(FailingUploadSession {
                log: self.log.clone(),
            }))
        }
    }

    #[async_trait]
    impl RemoteSession for FailingUploadSession {
        async fn exec(&self, _cmd: &str) -> Result<String, BootstrapError> {
            Ok(String::new())
        }

        async fn upload(&self, _remote_name: &str, _data: &[u8]) -> Result<(), BootstrapError> {
            self.log.lock().unwrap().push("upload".into());
            Err(BootstrapError::Transfer("disk full".into()))
        }
    }

    struct NeverProbe;

    #[async_trait]
    impl LivenessProbe for NeverProbe {
        async fn probe(&self, _addr: &str) -> Result<(), BootstrapError> {
            panic!("probe must not run after an earlier stage failed");
        }
    }

    #[tokio::test]
    async fn transfer_failure_is_fatal_and_never_retried() {
        let log: OpLog = Arc::new(Mutex::new(Vec::new()));
        let shell = FailingUploadShell { log: log.clone() };

        let outcome = bootstrap_instance(
            &shell,
            &NeverProbe,
            &test_artifact(),
            &test_instance(),
            &fast_policies(),
        )
        .await;

        match outcome {
            BootstrapOutcome::Failed { stage, error, .. } => {
                assert_eq!(stage, BootstrapStage::PushingArtifact);
                assert!(matches!(error, BootstrapError::Transfer(_)));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // Exactly one upload attempt
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    struct FlakyConnectShell {
        remaining_failures: Arc<Mutex<u32>>,
        log: OpLog,
    }

    #[async_trait]
    impl RemoteShell for FlakyConnectShell {
        async fn connect(&self, _addr: &str) -> Result<Box<dyn RemoteSession>, BootstrapError> {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BootstrapError::ConnectionNotReady("sshd not up".into()));
            }
            Ok(Box::new(RecordingSession {
                log: self.log.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn connect_retries_until_sshd_accepts() {
        let log: OpLog = Arc::new(Mutex::new(Vec::new()));
        let shell = FlakyConnectShell {
            remaining_failures: Arc::new(Mutex::new(2)),
            log: log.clone(),
        };
        let probe = RecordingProbe { log: log.clone() };

        let outcome = bootstrap_instance(
            &shell,
            &probe,
            &test_artifact(),
            &test_instance(),
            &fast_policies(),
        )
        .await;

        assert!(outcome.is_ready());
    }
}
