//! Bootstrap error classification
//!
//! Typed errors for the per-instance bootstrap pipeline. Classification
//! drives retry behavior: each step's retry policy declares the classes it
//! retries via the `is_*` predicates, and anything outside that set
//! propagates immediately as that instance's failure.

use thiserror::Error;

/// Errors produced while bootstrapping a single instance
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Instance has a public address but is not yet accepting connections
    /// (SSH port closed, handshake refused). Retryable during connect.
    #[error("instance not yet reachable: {0}")]
    ConnectionNotReady(String),

    /// Remote command exited non-zero, or the exec channel failed mid-command.
    /// Retryable for install/build/start steps.
    #[error("remote command exited with status {status}: {stderr}")]
    RemoteExec { status: i32, stderr: String },

    /// Remote filesystem write failed during artifact transfer. Fatal.
    #[error("artifact transfer failed: {0}")]
    Transfer(String),

    /// Liveness probe got a connection error or non-2xx response.
    /// Retryable while the container is still starting.
    #[error("liveness probe failed: {0}")]
    Probe(String),

    /// A required external resource (load balancer, key pair, security
    /// group, default VPC) does not exist. Fatal.
    #[error("{resource_type} '{name}' not found")]
    NotFound {
        resource_type: &'static str,
        name: String,
    },
}

impl BootstrapError {
    pub fn is_connection_not_ready(&self) -> bool {
        matches!(self, BootstrapError::ConnectionNotReady(_))
    }

    pub fn is_remote_exec(&self) -> bool {
        matches!(self, BootstrapError::RemoteExec { .. })
    }

    pub fn is_probe(&self) -> bool {
        matches!(self, BootstrapError::Probe(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BootstrapError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_their_own_class_only() {
        let conn = BootstrapError::ConnectionNotReady("refused".into());
        let exec = BootstrapError::RemoteExec {
            status: 1,
            stderr: "boom".into(),
        };
        let transfer = BootstrapError::Transfer("disk full".into());
        let probe = BootstrapError::Probe("503".into());

        assert!(conn.is_connection_not_ready());
        assert!(!conn.is_remote_exec());
        assert!(exec.is_remote_exec());
        assert!(!exec.is_probe());
        assert!(probe.is_probe());
        assert!(!transfer.is_connection_not_ready());
        assert!(!transfer.is_remote_exec());
        assert!(!transfer.is_probe());
    }

    #[test]
    fn display_includes_diagnostics() {
        let err = BootstrapError::RemoteExec {
            status: 127,
            stderr: "docker: command not found".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("127"));
        assert!(msg.contains("docker: command not found"));

        let err = BootstrapError::NotFound {
            resource_type: "load balancer",
            name: "fleet-bench".into(),
        };
        assert_eq!(err.to_string(), "load balancer 'fleet-bench' not found");
    }
}
