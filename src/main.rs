//! fleet-bench: deploy an EC2 fleet behind a load balancer, benchmark it,
//! and tear it down.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use fleet_bench::archive::{self, ArtifactSpec};
use fleet_bench::aws::{CloudWatchClient, Ec2Client, ElbClient};
use fleet_bench::bootstrap::BootstrapPolicies;
use fleet_bench::config::{
    BenchConfig, DeployConfig, CLUSTERS, DEFAULT_FLEET_NAME, DEFAULT_IMAGE_ID, DEFAULT_M4_COUNT,
    DEFAULT_REGION, DEFAULT_T2_COUNT, RESULTS_DIR, SSH_USER,
};
use fleet_bench::probe::HttpProbe;
use fleet_bench::scenario::{self, ScenarioConfig};
use fleet_bench::ssh::Ssh2Shell;
use fleet_bench::{aws, fleet};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fleet-bench")]
#[command(about = "EC2 fleet deployment and load-balancer benchmarking")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch the fleet, create the load balancer, and bootstrap the app
    /// onto every instance
    Deploy {
        /// Name shared by every tagged resource
        #[arg(long, default_value = DEFAULT_FLEET_NAME)]
        fleet_name: String,

        /// AWS region
        #[arg(long, default_value = DEFAULT_REGION)]
        region: String,

        /// AMI the instances boot from
        #[arg(long, default_value = DEFAULT_IMAGE_ID)]
        image_id: String,

        /// Number of m4.large instances
        #[arg(long, default_value_t = DEFAULT_M4_COUNT)]
        m4_count: i32,

        /// Number of t2.large instances
        #[arg(long, default_value_t = DEFAULT_T2_COUNT)]
        t2_count: i32,

        /// Launch a single small instance instead of the full fleet
        #[arg(long)]
        dev: bool,

        /// Application source tree to bundle and deploy
        #[arg(long, default_value = "demos/app")]
        app_dir: PathBuf,
    },

    /// Run the load-test scenario against the balancer and save its metrics
    Bench {
        #[arg(long, default_value = DEFAULT_FLEET_NAME)]
        fleet_name: String,

        #[arg(long, default_value = DEFAULT_REGION)]
        region: String,

        /// Directory benchmark result files are written to
        #[arg(long, default_value = RESULTS_DIR)]
        results_dir: PathBuf,
    },

    /// Tear down every resource the fleet name tags
    Cleanup {
        #[arg(long, default_value = DEFAULT_FLEET_NAME)]
        fleet_name: String,

        #[arg(long, default_value = DEFAULT_REGION)]
        region: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Deploy {
            fleet_name,
            region,
            image_id,
            m4_count,
            t2_count,
            dev,
            app_dir,
        } => {
            let config = DeployConfig {
                fleet_name,
                region,
                image_id,
                m4_count,
                t2_count,
                dev,
                artifact: ArtifactSpec {
                    manifest: app_dir.join("Cargo.toml"),
                    lock: Some(app_dir.join("Cargo.lock")).filter(|p| p.exists()),
                    app_dir,
                },
            };
            deploy(config).await
        }

        Command::Bench {
            fleet_name,
            region,
            results_dir,
        } => {
            let config = BenchConfig {
                fleet_name,
                region,
                scenario: ScenarioConfig::default(),
                results_dir,
            };
            bench(config).await
        }

        Command::Cleanup { fleet_name, region } => cleanup(&fleet_name, &region).await,
    }
}

async fn deploy(config: DeployConfig) -> Result<()> {
    info!(
        fleet = %config.fleet_name,
        region = %config.region,
        dev = config.dev,
        "Starting deployment"
    );

    let ec2 = Ec2Client::new(&config.region).await?;
    let elb = ElbClient::new(&config.region).await?;

    let vpc_id = ec2.default_vpc().await?;
    let key_path = ec2.create_key_pair(&config.fleet_name).await?;
    let sg_id = ec2
        .create_security_group(&config.security_group_name(), &vpc_id)
        .await?;

    let instances = ec2.launch_fleet(&config, &sg_id).await?;

    let subnets = ec2.vpc_subnets(&vpc_id).await?;
    elb.create_load_balancer(&config.fleet_name, &subnets, &sg_id)
        .await?;

    let artifact = archive::bundle(&config.artifact)?;
    let shell = Ssh2Shell::new(&key_path, SSH_USER);
    let probe = HttpProbe::new()?;
    let policies = BootstrapPolicies::default();

    let outcomes = fleet::bootstrap_fleet(&shell, &probe, &artifact, &instances, &policies).await;

    if !fleet::all_ready(&outcomes) {
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.is_ready())
            .map(|o| o.instance_id())
            .collect();
        bail!(
            "Deployment incomplete: {}/{} instances failed to bootstrap ({})",
            failed.len(),
            outcomes.len(),
            failed.join(", ")
        );
    }

    info!(count = outcomes.len(), "Deployment complete, all instances serving");
    Ok(())
}

async fn bench(config: BenchConfig) -> Result<()> {
    let elb = ElbClient::new(&config.region).await?;
    elb.wait_until_available(&config.fleet_name).await?;
    let (lb_arn, lb_dns) = elb.describe(&config.fleet_name).await?;

    let start = Utc::now();
    info!(lb_dns = %lb_dns, start = %start, "Benchmark window opened");

    for cluster in CLUSTERS {
        scenario::run_load_test(&lb_dns, cluster, config.scenario).await?;
    }

    let end = Utc::now();
    info!(end = %end, "Benchmark window closed");

    let cloudwatch = CloudWatchClient::new(&config.region).await?;
    let series = cloudwatch.harvest(&lb_arn, start, end).await?;
    let path = aws::cloudwatch::save_results(&config.results_dir, start, &series)?;

    info!(path = %path.display(), series = series.len(), "Benchmark complete");
    Ok(())
}

/// Best-effort teardown: every step runs even when earlier ones fail.
async fn cleanup(fleet_name: &str, region: &str) -> Result<()> {
    info!(fleet = %fleet_name, "Cleaning up fleet resources");

    let ec2 = Ec2Client::new(region).await?;
    let elb = ElbClient::new(region).await?;

    let mut failures = 0;

    match ec2.terminate_fleet(fleet_name).await {
        Ok(count) => info!(count, "Instances terminated"),
        Err(e) => {
            warn!(error = %e, "Failed to terminate instances");
            failures += 1;
        }
    }

    if let Err(e) = elb.delete(fleet_name).await {
        warn!(error = %e, "Failed to delete load balancer");
        failures += 1;
    }

    let sg_name = format!("{fleet_name}-sg");
    if let Err(e) = ec2.delete_security_group(&sg_name).await {
        warn!(error = %e, "Failed to delete security group");
        failures += 1;
    }

    if let Err(e) = ec2.delete_key_pair(fleet_name).await {
        warn!(error = %e, "Failed to delete key pair");
        failures += 1;
    }

    if failures > 0 {
        bail!("Cleanup finished with {failures} failed steps; re-run or remove the leftovers manually");
    }

    info!("Cleanup complete");
    Ok(())
}
