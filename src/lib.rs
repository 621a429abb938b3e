//! fleet-bench - EC2 fleet deployment and load-balancer benchmarking
//!
//! This crate provisions a fleet of EC2 instances behind an application
//! load balancer, bootstraps a containerized web application onto every
//! instance over SSH, and drives a timed load-test scenario against the
//! balancer while harvesting its CloudWatch metrics.
//!
//! ## Pipeline
//!
//! - `deploy`: launch the fleet, create the load balancer, bootstrap each
//!   instance concurrently (install runtime, push the source archive,
//!   build the image, start the container, probe liveness)
//! - `bench`: run the two-routine load test against the balancer and
//!   save the metric series it produced
//! - `cleanup`: tear down every resource the fleet name tags

pub mod archive;
pub mod aws;
pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod error;
pub mod fleet;
pub mod probe;
pub mod retry;
pub mod scenario;
pub mod ssh;
