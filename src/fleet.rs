//! Fleet coordinator: fans the bootstrap sequencer out across all instances.
//!
//! One unit of work per instance, all running to completion independently.
//! A failed instance never cancels or blocks its siblings; the caller gets
//! the full outcome set and decides what an acceptable deployment looks like.

use crate::archive::Artifact;
use crate::bootstrap::{bootstrap_instance, BootstrapOutcome, BootstrapPolicies, FleetInstance};
use crate::probe::LivenessProbe;
use crate::ssh::RemoteShell;
use futures::future::join_all;
use tracing::{info, warn};

/// Bootstrap every instance concurrently and collect all outcomes.
///
/// The returned vector has exactly one entry per instance, in input order.
pub async fn bootstrap_fleet(
    shell: &dyn RemoteShell,
    probe: &dyn LivenessProbe,
    artifact: &Artifact,
    instances: &[FleetInstance],
    policies: &BootstrapPolicies,
) -> Vec<BootstrapOutcome> {
    info!(count = instances.len(), "Bootstrapping fleet");

    let futures: Vec<_> = instances
        .iter()
        .map(|instance| bootstrap_instance(shell, probe, artifact, instance, policies))
        .collect();

    let outcomes = join_all(futures).await;

    let ready = outcomes.iter().filter(|o| o.is_ready()).count();
    info!(
        ready,
        failed = outcomes.len() - ready,
        "Fleet bootstrap finished"
    );
    for outcome in &outcomes {
        if let BootstrapOutcome::Failed {
            instance_id,
            stage,
            error,
        } = outcome
        {
            warn!(
                instance_id = %instance_id,
                stage = %stage,
                error = %error,
                "Instance failed to bootstrap"
            );
        }
    }

    outcomes
}

/// True when every instance in the batch reached `Ready`.
pub fn all_ready(outcomes: &[BootstrapOutcome]) -> bool {
    !outcomes.is_empty() && outcomes.iter().all(BootstrapOutcome::is_ready)
}
