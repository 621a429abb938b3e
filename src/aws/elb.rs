//! Application load balancer management.

use crate::error::BootstrapError;
use anyhow::{Context, Result};
use aws_sdk_elasticloadbalancingv2::types::LoadBalancerStateEnum;
use aws_sdk_elasticloadbalancingv2::Client;
use std::time::Duration;
use tracing::{debug, info};

const AVAILABLE_POLL_INTERVAL: Duration = Duration::from_secs(10);
const AVAILABLE_TIMEOUT: Duration = Duration::from_secs(600);

/// ELBv2 client for the fleet's load balancer
pub struct ElbClient {
    client: Client,
}

impl ElbClient {
    pub async fn new(region: &str) -> Result<Self> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        Ok(Self {
            client: Client::new(&config),
        })
    }

    /// Create the load balancer across the given subnets.
    pub async fn create_load_balancer(
        &self,
        name: &str,
        subnets: &[String],
        security_group_id: &str,
    ) -> Result<String> {
        info!(lb_name = %name, subnets = subnets.len(), "Creating load balancer");

        let response = self
            .client
            .create_load_balancer()
            .name(name)
            .set_subnets(Some(subnets.to_vec()))
            .security_groups(security_group_id)
            .send()
            .await
            .context("Failed to create load balancer")?;

        let arn = response
            .load_balancers()
            .first()
            .and_then(|lb| lb.load_balancer_arn())
            .context("No load balancer ARN returned")?
            .to_string();

        info!(lb_arn = %arn, "Load balancer created");
        Ok(arn)
    }

    /// Look up the load balancer by name, returning its ARN and DNS name.
    pub async fn describe(&self, name: &str) -> Result<(String, String)> {
        let response = self
            .client
            .describe_load_balancers()
            .names(name)
            .send()
            .await
            .with_context(|| format!("Failed to describe load balancer {name}"))?;

        let lb = response
            .load_balancers()
            .first()
            .ok_or(BootstrapError::NotFound {
                resource_type: "load balancer",
                name: name.to_string(),
            })?;

        let arn = lb
            .load_balancer_arn()
            .ok_or(BootstrapError::NotFound {
                resource_type: "load balancer ARN",
                name: name.to_string(),
            })?
            .to_string();
        let dns = lb
            .dns_name()
            .ok_or(BootstrapError::NotFound {
                resource_type: "load balancer DNS name",
                name: name.to_string(),
            })?
            .to_string();

        Ok((arn, dns))
    }

    /// Poll until the load balancer reports the active state.
    pub async fn wait_until_available(&self, name: &str) -> Result<()> {
        info!(lb_name = %name, "Waiting for load balancer to become available");
        let start = std::time::Instant::now();

        loop {
            let response = self
                .client
                .describe_load_balancers()
                .names(name)
                .send()
                .await
                .with_context(|| format!("Failed to describe load balancer {name}"))?;

            let active = response
                .load_balancers()
                .first()
                .and_then(|lb| lb.state())
                .and_then(|s| s.code())
                .map(|code| *code == LoadBalancerStateEnum::Active)
                .unwrap_or(false);

            if active {
                info!(lb_name = %name, "Load balancer is available");
                return Ok(());
            }

            if start.elapsed() >= AVAILABLE_TIMEOUT {
                anyhow::bail!(
                    "Timeout waiting for load balancer {} to become available",
                    name
                );
            }

            debug!(lb_name = %name, "Load balancer still provisioning");
            tokio::time::sleep(AVAILABLE_POLL_INTERVAL).await;
        }
    }

    /// Delete the load balancer by name; absence is logged and skipped.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .describe_load_balancers()
            .send()
            .await
            .context("Failed to list load balancers")?;

        let arn = response
            .load_balancers()
            .iter()
            .find(|lb| lb.load_balancer_name() == Some(name))
            .and_then(|lb| lb.load_balancer_arn());

        match arn {
            Some(arn) => {
                info!(lb_arn = %arn, "Deleting load balancer");
                self.client
                    .delete_load_balancer()
                    .load_balancer_arn(arn)
                    .send()
                    .await
                    .context("Failed to delete load balancer")?;
                Ok(())
            }
            None => {
                info!(lb_name = %name, "Load balancer not found, nothing to delete");
                Ok(())
            }
        }
    }
}
