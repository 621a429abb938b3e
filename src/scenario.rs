//! Load-test scenario driver.
//!
//! Two traffic-generation routines rendezvous at a two-party barrier so their
//! first requests leave at the same logical instant, then diverge: the steady
//! routine sustains continuous load while the valley routine pauses mid-run,
//! creating a load valley between two plateaus. Per-request failures are
//! logged and ignored; the goal is traffic generation, not per-request
//! correctness.

use crate::probe::{HttpProbe, LivenessProbe};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tracing::{debug, info, warn};

/// Which traffic routine a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Routine {
    /// Continuous load, no pause
    Steady,
    /// Two plateaus separated by a pause
    Valley,
}

/// Request volumes and the mid-run pause
#[derive(Debug, Clone, Copy)]
pub struct ScenarioConfig {
    /// Sequential requests issued by the steady routine
    pub steady_requests: u32,
    /// Valley routine requests before the pause
    pub valley_lead: u32,
    /// Valley routine requests after the pause
    pub valley_tail: u32,
    /// Pause between the valley routine's plateaus
    pub pause: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            steady_requests: 1000,
            valley_lead: 500,
            valley_tail: 1000,
            pause: Duration::from_secs(60),
        }
    }
}

/// Run both routines to completion against the given request operation.
///
/// A fresh barrier is allocated per run, so repeated invocations never see
/// stale party counts. Returns only after both routines finish.
pub async fn run_scenario<F, Fut>(config: ScenarioConfig, make_req: F)
where
    F: Fn(Routine) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let barrier = Arc::new(Barrier::new(2));

    let steady = tokio::spawn(steady_routine(
        Arc::clone(&barrier),
        config,
        make_req.clone(),
    ));
    let valley = tokio::spawn(valley_routine(barrier, config, make_req));

    if let Err(e) = steady.await {
        warn!(error = ?e, "Steady routine task failed");
    }
    if let Err(e) = valley.await {
        warn!(error = ?e, "Valley routine task failed");
    }
}

/// Issue `steady_requests` sequential requests after the rendezvous.
pub async fn steady_routine<F, Fut>(barrier: Arc<Barrier>, config: ScenarioConfig, make_req: F)
where
    F: Fn(Routine) -> Fut,
    Fut: Future<Output = ()>,
{
    info!(requests = config.steady_requests, "Steady routine waiting at barrier");
    barrier.wait().await;
    for _ in 0..config.steady_requests {
        make_req(Routine::Steady).await;
    }
    info!("Steady routine finished");
}

/// Issue `valley_lead` requests, pause, then issue `valley_tail` more.
pub async fn valley_routine<F, Fut>(barrier: Arc<Barrier>, config: ScenarioConfig, make_req: F)
where
    F: Fn(Routine) -> Fut,
    Fut: Future<Output = ()>,
{
    info!(
        lead = config.valley_lead,
        tail = config.valley_tail,
        pause_secs = config.pause.as_secs(),
        "Valley routine waiting at barrier"
    );
    barrier.wait().await;
    for _ in 0..config.valley_lead {
        make_req(Routine::Valley).await;
    }
    tokio::time::sleep(config.pause).await;
    for _ in 0..config.valley_tail {
        make_req(Routine::Valley).await;
    }
    info!("Valley routine finished");
}

/// Drive the scenario against the load balancer for one cluster path.
pub async fn run_load_test(lb_dns: &str, cluster: &str, config: ScenarioConfig) -> Result<()> {
    let prober = Arc::new(
        HttpProbe::with_path(cluster).context("Failed to build load-test request client")?,
    );
    let target = lb_dns.to_string();

    info!(lb_dns = %lb_dns, cluster = %cluster, "Starting load-test scenario");

    let make_req = move |routine: Routine| {
        let prober = Arc::clone(&prober);
        let target = target.clone();
        async move {
            if let Err(e) = prober.probe(&target).await {
                debug!(error = %e, ?routine, "Request failed");
            }
        }
    };

    run_scenario(config, make_req).await;

    info!(cluster = %cluster, "Load-test scenario complete");
    Ok(())
}
