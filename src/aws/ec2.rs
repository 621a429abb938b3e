//! EC2 provisioning: key pair, security group, fleet launch, teardown.

use crate::bootstrap::FleetInstance;
use crate::config::DeployConfig;
use crate::error::BootstrapError;
use anyhow::{Context, Result};
use aws_sdk_ec2::types::{
    Filter, InstanceStateName, InstanceType, IpPermission, IpRange, ResourceType, Tag,
    TagSpecification,
};
use aws_sdk_ec2::Client;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Ports opened to the world on the fleet security group
const INGRESS_PORTS: &[i32] = &[22, 80];

/// EC2 client for managing the fleet's resources
pub struct Ec2Client {
    client: Client,
}

impl Ec2Client {
    pub async fn new(region: &str) -> Result<Self> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        Ok(Self {
            client: Client::new(&config),
        })
    }

    /// Find the account's default VPC.
    pub async fn default_vpc(&self) -> Result<String> {
        let response = self
            .client
            .describe_vpcs()
            .filters(Filter::builder().name("is-default").values("true").build())
            .send()
            .await
            .context("Failed to describe VPCs")?;

        let vpc_id = response
            .vpcs()
            .first()
            .and_then(|v| v.vpc_id())
            .ok_or(BootstrapError::NotFound {
                resource_type: "default VPC",
                name: "is-default".to_string(),
            })?;

        debug!(vpc_id = %vpc_id, "Found default VPC");
        Ok(vpc_id.to_string())
    }

    /// All subnet IDs of a VPC (the load balancer spans them all).
    pub async fn vpc_subnets(&self, vpc_id: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .context("Failed to describe subnets")?;

        Ok(response
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_id().map(|id| id.to_string()))
            .collect())
    }

    /// Create the fleet key pair and write the private key next to the
    /// working directory, owner-readable only.
    pub async fn create_key_pair(&self, fleet_name: &str) -> Result<PathBuf> {
        info!(key_name = %fleet_name, "Creating key pair");

        let response = self
            .client
            .create_key_pair()
            .key_name(fleet_name)
            .send()
            .await
            .context("Failed to create key pair")?;

        let material = response
            .key_material()
            .context("Key pair created without key material")?;

        let path = PathBuf::from(format!("{fleet_name}.pem"));
        std::fs::write(&path, material)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to chmod {}", path.display()))?;
        }

        Ok(path)
    }

    /// Create the fleet security group with SSH and HTTP ingress.
    pub async fn create_security_group(&self, name: &str, vpc_id: &str) -> Result<String> {
        info!(group_name = %name, "Creating security group");

        let response = self
            .client
            .create_security_group()
            .group_name(name)
            .description(name)
            .vpc_id(vpc_id)
            .send()
            .await
            .context("Failed to create security group")?;

        let group_id = response
            .group_id()
            .context("No security group ID returned")?
            .to_string();

        let mut request = self
            .client
            .authorize_security_group_ingress()
            .group_id(&group_id);
        for port in INGRESS_PORTS {
            request = request.ip_permissions(
                IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(*port)
                    .to_port(*port)
                    .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
                    .build(),
            );
        }
        request
            .send()
            .await
            .context("Failed to authorize ingress")?;

        Ok(group_id)
    }

    /// Launch the fleet, wait for every instance to be running with a
    /// public address, and return handles ordered by batch ordinal.
    pub async fn launch_fleet(
        &self,
        config: &DeployConfig,
        security_group_id: &str,
    ) -> Result<Vec<FleetInstance>> {
        let mut instance_ids = Vec::new();

        if config.dev {
            info!("Dev mode: launching a single t2.micro");
            instance_ids.extend(
                self.launch_group(config, security_group_id, "t2.micro", 1)
                    .await?,
            );
        } else {
            instance_ids.extend(
                self.launch_group(config, security_group_id, "m4.large", config.m4_count)
                    .await?,
            );
            instance_ids.extend(
                self.launch_group(config, security_group_id, "t2.large", config.t2_count)
                    .await?,
            );
        }

        let mut instances = Vec::with_capacity(instance_ids.len());
        for (ordinal, instance_id) in instance_ids.into_iter().enumerate() {
            let public_addr = self.wait_for_running(&instance_id).await?;
            instances.push(FleetInstance {
                instance_id,
                public_addr,
                ordinal: ordinal as u32,
            });
        }

        info!(count = instances.len(), "Fleet launched");
        Ok(instances)
    }

    async fn launch_group(
        &self,
        config: &DeployConfig,
        security_group_id: &str,
        instance_type: &str,
        count: i32,
    ) -> Result<Vec<String>> {
        info!(instance_type = %instance_type, count, "Launching instances");

        let instance_type_enum: InstanceType = instance_type
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid instance type: {}", instance_type))?;

        let response = self
            .client
            .run_instances()
            .image_id(&config.image_id)
            .instance_type(instance_type_enum)
            .key_name(&config.fleet_name)
            .security_group_ids(security_group_id)
            .min_count(count)
            .max_count(count)
            .tag_specifications(
                TagSpecification::builder()
                    .resource_type(ResourceType::Instance)
                    .tags(
                        Tag::builder()
                            .key("Name")
                            .value(&config.fleet_name)
                            .build(),
                    )
                    .build(),
            )
            .send()
            .await
            .context("Failed to launch instances")?;

        Ok(response
            .instances()
            .iter()
            .filter_map(|i| i.instance_id().map(|id| id.to_string()))
            .collect())
    }

    /// Wait for an instance to be running and report its public IP.
    ///
    /// The address is assigned lazily; the instance can be running briefly
    /// before it has one, so keep polling until both hold.
    pub async fn wait_for_running(&self, instance_id: &str) -> Result<String> {
        info!(instance_id = %instance_id, "Waiting for instance to be running");

        loop {
            let response = self
                .client
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .context("Failed to describe instance")?;

            let instance = response
                .reservations()
                .first()
                .and_then(|r| r.instances().first())
                .context("Instance not found")?;

            let state = instance
                .state()
                .and_then(|s| s.name())
                .unwrap_or(&InstanceStateName::Pending);

            match state {
                InstanceStateName::Running => {
                    if let Some(public_ip) = instance.public_ip_address() {
                        info!(instance_id = %instance_id, public_ip = %public_ip, "Instance is running");
                        return Ok(public_ip.to_string());
                    }
                    debug!(instance_id = %instance_id, "Running but no public address yet");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
                InstanceStateName::Pending => {
                    debug!(instance_id = %instance_id, "Instance still pending");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
                _ => {
                    anyhow::bail!(
                        "Instance {} entered unexpected state: {:?}",
                        instance_id,
                        state
                    );
                }
            }
        }
    }

    /// Terminate all pending/running instances tagged with the fleet name.
    pub async fn terminate_fleet(&self, fleet_name: &str) -> Result<usize> {
        let response = self
            .client
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("tag:Name")
                    .values(fleet_name)
                    .build(),
            )
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .build(),
            )
            .send()
            .await
            .context("Failed to describe fleet instances")?;

        let instance_ids: Vec<String> = response
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .filter_map(|i| i.instance_id().map(|id| id.to_string()))
            .collect();

        if instance_ids.is_empty() {
            info!(fleet = %fleet_name, "No instances to terminate");
            return Ok(0);
        }

        info!(count = instance_ids.len(), "Terminating fleet instances");
        self.client
            .terminate_instances()
            .set_instance_ids(Some(instance_ids.clone()))
            .send()
            .await
            .context("Failed to terminate instances")?;

        Ok(instance_ids.len())
    }

    /// Delete the fleet security group; absent groups are logged and skipped.
    pub async fn delete_security_group(&self, name: &str) -> Result<()> {
        info!(group_name = %name, "Deleting security group");

        match self
            .client
            .delete_security_group()
            .group_name(name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let error_str = format!("{e:?}");
                if error_str.contains("InvalidGroup.NotFound") {
                    info!(group_name = %name, "Security group already gone");
                    Ok(())
                } else {
                    Err(anyhow::Error::from(e).context("Failed to delete security group"))
                }
            }
        }
    }

    /// Delete the key pair and its local private key file; best-effort.
    pub async fn delete_key_pair(&self, fleet_name: &str) -> Result<()> {
        info!(key_name = %fleet_name, "Deleting key pair");

        self.client
            .delete_key_pair()
            .key_name(fleet_name)
            .send()
            .await
            .context("Failed to delete key pair")?;

        let pem = PathBuf::from(format!("{fleet_name}.pem"));
        if pem.exists() {
            if let Err(e) = std::fs::remove_file(&pem) {
                warn!(path = %pem.display(), error = %e, "Failed to remove local key file");
            }
        }

        Ok(())
    }
}
