//! Run configuration and fixed deployment constants.

use crate::archive::ArtifactSpec;
use crate::scenario::ScenarioConfig;
use std::path::PathBuf;

/// Name shared by the fleet's tagged resources (instances, key pair, LB)
pub const DEFAULT_FLEET_NAME: &str = "fleet-bench";

/// Default login account on the instances' image
pub const SSH_USER: &str = "ubuntu";

/// Port the application listens on inside the container
pub const APP_PORT: u16 = 8000;

/// Host port the container publishes to (and the probe targets)
pub const HOST_PORT: u16 = 80;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Ubuntu 22.04 LTS amd64 (us-east-1); snap is preinstalled
pub const DEFAULT_IMAGE_ID: &str = "ami-08d4ac5b634553e16";

pub const DEFAULT_M4_COUNT: i32 = 5;
pub const DEFAULT_T2_COUNT: i32 = 5;

/// Cluster path discriminators the load test runs against, in order
pub const CLUSTERS: &[&str] = &["cluster1", "cluster2"];

pub const RESULTS_DIR: &str = "results";

/// Configuration for a deployment run
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub fleet_name: String,
    pub region: String,
    pub image_id: String,
    pub m4_count: i32,
    pub t2_count: i32,
    /// Dev mode launches a single small instance instead of the full fleet
    pub dev: bool,
    pub artifact: ArtifactSpec,
}

impl DeployConfig {
    /// Private key file, named after the fleet
    pub fn key_pair_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.pem", self.fleet_name))
    }

    pub fn security_group_name(&self) -> String {
        format!("{}-sg", self.fleet_name)
    }
}

/// Configuration for a benchmark run
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub fleet_name: String,
    pub region: String,
    pub scenario: ScenarioConfig,
    pub results_dir: PathBuf,
}
