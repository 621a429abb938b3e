//! AWS service clients: EC2 provisioning, load balancer management, and
//! CloudWatch metric harvesting.

pub mod cloudwatch;
pub mod ec2;
pub mod elb;

pub use cloudwatch::CloudWatchClient;
pub use ec2::Ec2Client;
pub use elb::ElbClient;
