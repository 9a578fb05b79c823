//! Cloud collaborator contract.
//!
//! The core only reads through this trait. Implementations are thin data
//! fetchers: [`crate::io::aws::AwsCliCloud`] for live accounts and
//! [`crate::io::fixtures::FixtureCloud`] for offline runs and tests.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::core::context::SharedContext;

/// Longest window any query may span (ten years).
const MAX_WINDOW_SECS: u64 = 10 * 365 * 86_400;

/// Half-open `[start, end)` time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn ending_at(end: DateTime<Utc>, seconds: u64) -> Self {
        let span = Duration::seconds(i64::try_from(seconds.min(MAX_WINDOW_SECS)).unwrap_or(0));
        Self {
            start: end - span,
            end,
        }
    }

    pub fn ending_now(seconds: u64) -> Self {
        Self::ending_at(Utc::now(), seconds)
    }

    pub fn last_hours(hours: u32) -> Self {
        Self::ending_now(u64::from(hours) * 3600)
    }

    /// The same-length window moved back by `offset`.
    pub fn shifted_back(&self, offset: Duration) -> Self {
        Self {
            start: self.start - offset,
            end: self.end - offset,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Resource an investigation is about, as far as the classifier could tell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTarget {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
}

impl ResourceTarget {
    pub fn from_context(ctx: &SharedContext) -> Self {
        Self {
            resource_type: ctx.resource_type.clone(),
            resource_id: ctx.resource_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub window: TimeWindow,
    pub period_secs: u32,
}

impl MetricQuery {
    /// Default aggregation period in seconds.
    pub const PERIOD_SECS: u32 = 300;

    /// Map a generic metric on a resource to a concrete provider query.
    pub fn for_resource(target: &ResourceTarget, metric: &str, window: TimeWindow) -> Self {
        let resource_type = target.resource_type.as_deref().unwrap_or("");
        let (namespace, metric_name) = map_metric(resource_type, metric);
        Self {
            namespace: namespace.to_string(),
            metric_name,
            dimensions: dimensions_for(resource_type, target.resource_id.as_deref()),
            window,
            period_secs: Self::PERIOD_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
}

/// Datapoints in ascending timestamp order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSeries {
    pub datapoints: Vec<Datapoint>,
}

impl MetricSeries {
    pub fn new(mut datapoints: Vec<Datapoint>) -> Self {
        datapoints.sort_by_key(|dp| dp.timestamp);
        Self { datapoints }
    }

    pub fn averages(&self) -> Vec<f64> {
        self.datapoints.iter().map(|dp| dp.average).collect()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.datapoints.is_empty() {
            return None;
        }
        Some(self.datapoints.iter().map(|dp| dp.average).sum::<f64>() / self.datapoints.len() as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.datapoints.iter().map(|dp| dp.maximum).reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.datapoints.iter().map(|dp| dp.minimum).reduce(f64::min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    SecurityGroup,
    NetworkAcl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleDirection {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// One firewall rule from a security group or network ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityRule {
    pub source: RuleSource,
    /// Security group or ACL id.
    pub group_id: String,
    pub group_name: Option<String>,
    pub direction: RuleDirection,
    pub action: RuleAction,
    /// `-1` means all protocols.
    pub protocol: String,
    pub from_port: Option<u16>,
    pub to_port: Option<u16>,
    pub cidr: Option<String>,
    /// ACL evaluation order; absent for security groups.
    pub rule_number: Option<u32>,
}

impl SecurityRule {
    /// True when the rule applies to `port`. Rules without a range cover all
    /// ports.
    pub fn covers_port(&self, port: u16) -> bool {
        match (self.from_port, self.to_port) {
            (Some(from), Some(to)) => from <= port && port <= to,
            (Some(from), None) => from == port,
            _ => true,
        }
    }

    pub fn is_world_open(&self) -> bool {
        matches!(self.cidr.as_deref(), Some("0.0.0.0/0" | "::/0"))
    }

    pub fn port_label(&self) -> String {
        match (self.from_port, self.to_port) {
            (Some(from), Some(to)) if from == to => from.to_string(),
            (Some(from), Some(to)) => format!("{from}-{to}"),
            (Some(from), None) => from.to_string(),
            _ => "all".to_string(),
        }
    }
}

/// Audit-trail event (who changed what, when).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub event_name: String,
    pub event_time: DateTime<Utc>,
    pub event_source: Option<String>,
    pub username: Option<String>,
    pub resources: Vec<String>,
    pub error_code: Option<String>,
    pub request_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingActivity {
    pub time: DateTime<Utc>,
    pub status: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingConfig {
    pub enabled: bool,
    pub group_name: Option<String>,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub desired_capacity: u32,
    pub current_capacity: u32,
    /// Most recent first.
    pub activities: Vec<ScalingActivity>,
}

impl ScalingConfig {
    /// Configuration of a resource with no scaling group attached.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            group_name: None,
            min_capacity: 0,
            max_capacity: 0,
            desired_capacity: 0,
            current_capacity: 0,
            activities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub total: f64,
    pub by_service: BTreeMap<String, f64>,
    /// Ascending by date.
    pub daily: Vec<DailyCost>,
}

/// Read-only cloud capabilities consumed by primitives.
pub trait CloudApi: Send + Sync {
    fn fetch_metric_series(&self, query: &MetricQuery) -> Result<MetricSeries>;
    fn list_security_rules(&self) -> Result<Vec<SecurityRule>>;
    fn lookup_change_events(
        &self,
        target: &ResourceTarget,
        window: &TimeWindow,
    ) -> Result<Vec<ChangeEvent>>;
    fn describe_scaling_config(&self, target: &ResourceTarget) -> Result<ScalingConfig>;
    fn fetch_cost_breakdown(&self, window: &TimeWindow) -> Result<CostBreakdown>;
}

/// Map a generic metric name to a provider namespace and metric.
///
/// Unknown pairs fall back to `("AWS/CloudWatch", metric)`.
pub fn map_metric(resource_type: &str, metric: &str) -> (&'static str, String) {
    let mapped = match (resource_type, metric) {
        ("ec2", "cpu") => Some(("AWS/EC2", "CPUUtilization")),
        ("ec2", "memory") => Some(("CWAgent", "mem_used_percent")),
        ("ec2", "disk") => Some(("CWAgent", "disk_used_percent")),
        ("ec2", "network") => Some(("AWS/EC2", "NetworkIn")),
        ("rds", "cpu") => Some(("AWS/RDS", "CPUUtilization")),
        ("rds", "connections") => Some(("AWS/RDS", "DatabaseConnections")),
        ("rds", "memory") => Some(("AWS/RDS", "FreeableMemory")),
        ("rds", "iops") => Some(("AWS/RDS", "ReadIOPS")),
        ("rds", "latency" | "query_latency") => Some(("AWS/RDS", "ReadLatency")),
        ("rds", "replication_lag") => Some(("AWS/RDS", "ReplicaLag")),
        ("lambda", "duration" | "latency") => Some(("AWS/Lambda", "Duration")),
        ("lambda", "errors") => Some(("AWS/Lambda", "Errors")),
        ("lambda", "throttles") => Some(("AWS/Lambda", "Throttles")),
        ("lambda", "concurrency") => Some(("AWS/Lambda", "ConcurrentExecutions")),
        ("dynamodb", "read") => Some(("AWS/DynamoDB", "ConsumedReadCapacityUnits")),
        ("dynamodb", "write") => Some(("AWS/DynamoDB", "ConsumedWriteCapacityUnits")),
        ("dynamodb", "throttles") => Some(("AWS/DynamoDB", "UserErrors")),
        ("dynamodb", "latency") => Some(("AWS/DynamoDB", "SuccessfulRequestLatency")),
        ("dynamodb", "replication_lag") => Some(("AWS/DynamoDB", "ReplicationLatency")),
        _ => None,
    };
    match mapped {
        Some((namespace, name)) => (namespace, name.to_string()),
        None => ("AWS/CloudWatch", metric.to_string()),
    }
}

/// Provider dimensions identifying a resource. Empty without an id.
pub fn dimensions_for(resource_type: &str, resource_id: Option<&str>) -> Vec<Dimension> {
    let Some(id) = resource_id else {
        return Vec::new();
    };
    let name = match resource_type {
        "ec2" => "InstanceId",
        "rds" => "DBInstanceIdentifier",
        "lambda" => "FunctionName",
        "dynamodb" => "TableName",
        _ => return Vec::new(),
    };
    vec![Dimension {
        name: name.to_string(),
        value: id.to_string(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_metrics_and_falls_back() {
        assert_eq!(map_metric("rds", "connections"), ("AWS/RDS", "DatabaseConnections".to_string()));
        assert_eq!(map_metric("dynamodb", "throttles"), ("AWS/DynamoDB", "UserErrors".to_string()));
        assert_eq!(map_metric("eks", "cpu"), ("AWS/CloudWatch", "cpu".to_string()));
    }

    #[test]
    fn dimensions_need_an_id_and_a_known_type() {
        assert!(dimensions_for("ec2", None).is_empty());
        assert!(dimensions_for("eks", Some("prod")).is_empty());
        assert_eq!(
            dimensions_for("lambda", Some("checkout")),
            vec![Dimension {
                name: "FunctionName".to_string(),
                value: "checkout".to_string()
            }]
        );
    }

    #[test]
    fn series_is_sorted_and_summarized() {
        let t0 = Utc::now();
        let dp = |offset: i64, avg: f64| Datapoint {
            timestamp: t0 + Duration::minutes(offset),
            average: avg,
            maximum: avg + 5.0,
            minimum: avg - 5.0,
        };
        let series = MetricSeries::new(vec![dp(10, 80.0), dp(0, 40.0)]);
        assert_eq!(series.averages(), vec![40.0, 80.0]);
        assert_eq!(series.mean(), Some(60.0));
        assert_eq!(series.max(), Some(85.0));
        assert_eq!(series.min(), Some(35.0));
        assert_eq!(MetricSeries::default().mean(), None);
    }

    #[test]
    fn rule_port_coverage() {
        let mut rule = SecurityRule {
            source: RuleSource::NetworkAcl,
            group_id: "acl-1".to_string(),
            group_name: None,
            direction: RuleDirection::Egress,
            action: RuleAction::Deny,
            protocol: "6".to_string(),
            from_port: Some(5000),
            to_port: Some(6000),
            cidr: Some("0.0.0.0/0".to_string()),
            rule_number: Some(100),
        };
        assert!(rule.covers_port(5432));
        assert!(!rule.covers_port(443));
        assert_eq!(rule.port_label(), "5000-6000");
        rule.from_port = None;
        rule.to_port = None;
        assert!(rule.covers_port(443));
        assert!(rule.is_world_open());
    }

    #[test]
    fn shifted_window_keeps_length() {
        let window = TimeWindow::ending_now(3600);
        let earlier = window.shifted_back(Duration::days(1));
        assert_eq!(earlier.end - earlier.start, window.end - window.start);
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));
    }
}
