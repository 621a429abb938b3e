//! CloudWatch metric harvesting for the load balancer.
//!
//! Fetches the fleet's `AWS/ApplicationELB` series for the benchmark
//! window in one `get_metric_data` call and persists them as one JSON
//! document per run.

use anyhow::{Context, Result};
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Dimension, Metric, MetricDataQuery, MetricStat};
use aws_sdk_cloudwatch::Client;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

const NAMESPACE: &str = "AWS/ApplicationELB";
const PERIOD_SECS: i32 = 60;
const STAT: &str = "Average";

/// Balancer metrics harvested after a benchmark run
const METRIC_NAMES: &[&str] = &[
    "RequestCount",
    "TargetResponseTime",
    "ActiveConnectionCount",
    "NewConnectionCount",
    "ProcessedBytes",
    "HTTPCode_Target_2XX_Count",
    "HTTPCode_Target_5XX_Count",
    "HTTPCode_ELB_5XX_Count",
];

/// One harvested metric time series
#[derive(Debug, Serialize)]
pub struct MetricSeries {
    pub id: String,
    pub label: String,
    pub timestamps: Vec<String>,
    pub values: Vec<f64>,
}

/// CloudWatch client scoped to one load balancer's metrics
pub struct CloudWatchClient {
    client: Client,
}

impl CloudWatchClient {
    pub async fn new(region: &str) -> Result<Self> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        Ok(Self {
            client: Client::new(&config),
        })
    }

    /// Fetch the balancer's metric series over the given window.
    pub async fn harvest(
        &self,
        lb_arn: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSeries>> {
        let specifier = specifier_from_arn(lb_arn)?;
        info!(specifier = %specifier, metrics = METRIC_NAMES.len(), "Fetching metric data");

        let dimension = Dimension::builder()
            .name("LoadBalancer")
            .value(specifier)
            .build();

        let mut request = self
            .client
            .get_metric_data()
            .start_time(AwsDateTime::from_secs(start.timestamp()))
            .end_time(AwsDateTime::from_secs(end.timestamp()));
        for (i, metric_name) in METRIC_NAMES.iter().enumerate() {
            request = request.metric_data_queries(
                MetricDataQuery::builder()
                    .id(format!("metric_{i}"))
                    .metric_stat(
                        MetricStat::builder()
                            .metric(
                                Metric::builder()
                                    .namespace(NAMESPACE)
                                    .metric_name(*metric_name)
                                    .dimensions(dimension.clone())
                                    .build(),
                            )
                            .period(PERIOD_SECS)
                            .stat(STAT)
                            .build(),
                    )
                    .label(*metric_name)
                    .build(),
            );
        }

        let response = request
            .send()
            .await
            .context("Failed to fetch metric data")?;

        let series = response
            .metric_data_results()
            .iter()
            .map(|result| MetricSeries {
                id: result.id().unwrap_or_default().to_string(),
                label: result.label().unwrap_or_default().to_string(),
                timestamps: result
                    .timestamps()
                    .iter()
                    .map(|ts| {
                        DateTime::<Utc>::from_timestamp(ts.secs(), 0)
                            .map(|dt| dt.to_rfc3339())
                            .unwrap_or_default()
                    })
                    .collect(),
                values: result.values().to_vec(),
            })
            .collect();

        Ok(series)
    }
}

/// Extract the dimension specifier (`app/<name>/<id>`) from a load
/// balancer ARN.
pub fn specifier_from_arn(arn: &str) -> Result<&str> {
    arn.split_once(":loadbalancer/")
        .map(|(_, suffix)| suffix)
        .with_context(|| format!("Not a load balancer ARN: {arn}"))
}

/// Write harvested series to `<dir>/<start-timestamp>.json`.
pub fn save_results(
    dir: &Path,
    start: DateTime<Utc>,
    series: &[MetricSeries],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(format!("{}.json", start.format("%Y-%m-%dT%H-%M-%S")));
    let json = serde_json::to_string_pretty(series).context("Failed to serialize metric data")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), "Benchmark results written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specifier_extraction() {
        let arn = "arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/app/fleet-bench/50dc6c495c0c9188";
        assert_eq!(
            specifier_from_arn(arn).unwrap(),
            "app/fleet-bench/50dc6c495c0c9188"
        );
        assert!(specifier_from_arn("arn:aws:iam::123:role/foo").is_err());
    }

    #[test]
    fn results_written_under_start_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let start = DateTime::parse_from_rfc3339("2024-05-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let series = vec![MetricSeries {
            id: "metric_0".into(),
            label: "RequestCount".into(),
            timestamps: vec!["2024-05-01T12:31:00+00:00".into()],
            values: vec![42.0],
        }];

        let path = save_results(dir.path(), start, &series).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "2024-05-01T12-30-00.json"
        );
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("RequestCount"));
        assert!(contents.contains("42.0"));
    }
}
