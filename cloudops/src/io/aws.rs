//! [`CloudApi`] backed by the `aws` CLI.
//!
//! Only describe/get/list/lookup subcommands are issued. Every call passes
//! `--output json` and runs under the configured timeout; response parsing is
//! split into pure functions so it can be tested without an account.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::io::cloud::{
    ChangeEvent, CloudApi, CostBreakdown, DailyCost, Datapoint, MetricQuery, MetricSeries,
    ResourceTarget, RuleAction, RuleDirection, RuleSource, ScalingActivity, ScalingConfig,
    SecurityRule, TimeWindow,
};
use crate::io::process::run_json;

/// Most recent scaling activities fetched per group.
const SCALING_ACTIVITY_LIMIT: u32 = 5;

#[derive(Debug, Clone)]
pub struct AwsCliCloud {
    command: Vec<String>,
    region: Option<String>,
    profile: Option<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl AwsCliCloud {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            region: None,
            profile: None,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    fn argv(&self, service: &str, operation: &str, args: Vec<String>) -> Vec<String> {
        let mut argv = self.command.clone();
        argv.push(service.to_string());
        argv.push(operation.to_string());
        argv.extend(args);
        argv.extend(["--output".to_string(), "json".to_string()]);
        if let Some(region) = &self.region {
            argv.extend(["--region".to_string(), region.clone()]);
        }
        if let Some(profile) = &self.profile {
            argv.extend(["--profile".to_string(), profile.clone()]);
        }
        argv
    }

    #[instrument(skip(self, args))]
    fn call(&self, service: &str, operation: &str, args: Vec<String>) -> Result<Value> {
        let argv = self.argv(service, operation, args);
        debug!(argc = argv.len(), "aws call");
        run_json(&argv, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("aws {service} {operation}"))
    }
}

impl CloudApi for AwsCliCloud {
    fn fetch_metric_series(&self, query: &MetricQuery) -> Result<MetricSeries> {
        let mut args = vec![
            "--namespace".to_string(),
            query.namespace.clone(),
            "--metric-name".to_string(),
            query.metric_name.clone(),
            "--start-time".to_string(),
            iso(query.window.start),
            "--end-time".to_string(),
            iso(query.window.end),
            "--period".to_string(),
            query.period_secs.to_string(),
            "--statistics".to_string(),
            "Average".to_string(),
            "Maximum".to_string(),
            "Minimum".to_string(),
        ];
        if !query.dimensions.is_empty() {
            args.push("--dimensions".to_string());
            args.extend(
                query
                    .dimensions
                    .iter()
                    .map(|d| format!("Name={},Value={}", d.name, d.value)),
            );
        }
        parse_metric_statistics(self.call("cloudwatch", "get-metric-statistics", args)?)
    }

    fn list_security_rules(&self) -> Result<Vec<SecurityRule>> {
        let mut rules =
            parse_security_groups(self.call("ec2", "describe-security-groups", Vec::new())?)?;
        rules.extend(parse_network_acls(
            self.call("ec2", "describe-network-acls", Vec::new())?,
        )?);
        Ok(rules)
    }

    fn lookup_change_events(
        &self,
        target: &ResourceTarget,
        window: &TimeWindow,
    ) -> Result<Vec<ChangeEvent>> {
        let mut args = vec![
            "--start-time".to_string(),
            iso(window.start),
            "--end-time".to_string(),
            iso(window.end),
        ];
        if let Some(id) = &target.resource_id {
            args.push("--lookup-attributes".to_string());
            args.push(format!("AttributeKey=ResourceName,AttributeValue={id}"));
        }
        parse_cloudtrail_events(self.call("cloudtrail", "lookup-events", args)?)
    }

    fn describe_scaling_config(&self, target: &ResourceTarget) -> Result<ScalingConfig> {
        let mut args = Vec::new();
        if let Some(id) = &target.resource_id {
            args.push("--auto-scaling-group-names".to_string());
            args.push(id.clone());
        }
        let groups = self.call("autoscaling", "describe-auto-scaling-groups", args)?;
        let Some(mut config) = parse_scaling_group(groups)? else {
            return Ok(ScalingConfig::disabled());
        };
        if let Some(name) = config.group_name.clone() {
            let activities = self.call(
                "autoscaling",
                "describe-scaling-activities",
                vec![
                    "--auto-scaling-group-name".to_string(),
                    name,
                    "--max-items".to_string(),
                    SCALING_ACTIVITY_LIMIT.to_string(),
                ],
            )?;
            config.activities = parse_scaling_activities(activities)?;
        }
        Ok(config)
    }

    fn fetch_cost_breakdown(&self, window: &TimeWindow) -> Result<CostBreakdown> {
        let args = vec![
            "--time-period".to_string(),
            format!(
                "Start={},End={}",
                window.start.date_naive(),
                window.end.date_naive()
            ),
            "--granularity".to_string(),
            "DAILY".to_string(),
            "--metrics".to_string(),
            "UnblendedCost".to_string(),
            "--group-by".to_string(),
            "Type=DIMENSION,Key=SERVICE".to_string(),
        ];
        parse_cost_and_usage(self.call("ce", "get-cost-and-usage", args)?)
    }
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricStatisticsResponse {
    #[serde(default)]
    datapoints: Vec<RawDatapoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDatapoint {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    average: Option<f64>,
    #[serde(default)]
    maximum: Option<f64>,
    #[serde(default)]
    minimum: Option<f64>,
}

pub fn parse_metric_statistics(value: Value) -> Result<MetricSeries> {
    let response: MetricStatisticsResponse =
        serde_json::from_value(value).context("parse metric statistics")?;
    let datapoints = response
        .datapoints
        .into_iter()
        .map(|dp| {
            let average = dp.average.unwrap_or_default();
            Datapoint {
                timestamp: dp.timestamp,
                average,
                maximum: dp.maximum.unwrap_or(average),
                minimum: dp.minimum.unwrap_or(average),
            }
        })
        .collect();
    Ok(MetricSeries::new(datapoints))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroupsResponse {
    #[serde(default)]
    security_groups: Vec<RawSecurityGroup>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSecurityGroup {
    group_id: String,
    #[serde(default)]
    group_name: Option<String>,
    #[serde(default)]
    ip_permissions: Vec<RawPermission>,
    #[serde(default)]
    ip_permissions_egress: Vec<RawPermission>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPermission {
    #[serde(default)]
    ip_protocol: Option<String>,
    #[serde(default)]
    from_port: Option<i32>,
    #[serde(default)]
    to_port: Option<i32>,
    #[serde(default)]
    ip_ranges: Vec<RawIpRange>,
    #[serde(default)]
    ipv6_ranges: Vec<RawIpv6Range>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawIpRange {
    cidr_ip: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawIpv6Range {
    cidr_ipv6: String,
}

/// Port numbers outside `0..=65535` (the provider uses `-1` for "all").
fn port(raw: Option<i32>) -> Option<u16> {
    raw.and_then(|p| u16::try_from(p).ok())
}

pub fn parse_security_groups(value: Value) -> Result<Vec<SecurityRule>> {
    let response: SecurityGroupsResponse =
        serde_json::from_value(value).context("parse security groups")?;
    let mut rules = Vec::new();
    for group in response.security_groups {
        let directed = group
            .ip_permissions
            .iter()
            .map(|p| (RuleDirection::Ingress, p))
            .chain(
                group
                    .ip_permissions_egress
                    .iter()
                    .map(|p| (RuleDirection::Egress, p)),
            );
        for (direction, permission) in directed {
            let cidrs: Vec<Option<String>> = permission
                .ip_ranges
                .iter()
                .map(|r| Some(r.cidr_ip.clone()))
                .chain(permission.ipv6_ranges.iter().map(|r| Some(r.cidr_ipv6.clone())))
                .collect();
            // Group-to-group references carry no CIDR; keep them as one rule.
            let cidrs = if cidrs.is_empty() { vec![None] } else { cidrs };
            for cidr in cidrs {
                rules.push(SecurityRule {
                    source: RuleSource::SecurityGroup,
                    group_id: group.group_id.clone(),
                    group_name: group.group_name.clone(),
                    direction,
                    action: RuleAction::Allow,
                    protocol: permission
                        .ip_protocol
                        .clone()
                        .unwrap_or_else(|| "-1".to_string()),
                    from_port: port(permission.from_port),
                    to_port: port(permission.to_port),
                    cidr,
                    rule_number: None,
                });
            }
        }
    }
    Ok(rules)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkAclsResponse {
    #[serde(default)]
    network_acls: Vec<RawNetworkAcl>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNetworkAcl {
    network_acl_id: String,
    #[serde(default)]
    entries: Vec<RawAclEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawAclEntry {
    rule_number: u32,
    #[serde(default)]
    protocol: Option<String>,
    rule_action: String,
    egress: bool,
    #[serde(default)]
    cidr_block: Option<String>,
    #[serde(default)]
    ipv6_cidr_block: Option<String>,
    #[serde(default)]
    port_range: Option<RawPortRange>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPortRange {
    from: i32,
    to: i32,
}

pub fn parse_network_acls(value: Value) -> Result<Vec<SecurityRule>> {
    let response: NetworkAclsResponse =
        serde_json::from_value(value).context("parse network acls")?;
    let mut rules = Vec::new();
    for acl in response.network_acls {
        for entry in acl.entries {
            rules.push(SecurityRule {
                source: RuleSource::NetworkAcl,
                group_id: acl.network_acl_id.clone(),
                group_name: None,
                direction: if entry.egress {
                    RuleDirection::Egress
                } else {
                    RuleDirection::Ingress
                },
                action: if entry.rule_action.eq_ignore_ascii_case("deny") {
                    RuleAction::Deny
                } else {
                    RuleAction::Allow
                },
                protocol: entry.protocol.unwrap_or_else(|| "-1".to_string()),
                from_port: entry.port_range.as_ref().and_then(|r| port(Some(r.from))),
                to_port: entry.port_range.as_ref().and_then(|r| port(Some(r.to))),
                cidr: entry.cidr_block.or(entry.ipv6_cidr_block),
                rule_number: Some(entry.rule_number),
            });
        }
    }
    Ok(rules)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LookupEventsResponse {
    #[serde(default)]
    events: Vec<RawTrailEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTrailEvent {
    event_name: String,
    event_time: DateTime<Utc>,
    #[serde(default)]
    event_source: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    resources: Vec<RawTrailResource>,
    /// The full record, JSON-encoded as a string.
    #[serde(default)]
    cloud_trail_event: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTrailResource {
    #[serde(default)]
    resource_name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TrailDetail {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    request_parameters: Option<Value>,
}

pub fn parse_cloudtrail_events(value: Value) -> Result<Vec<ChangeEvent>> {
    let response: LookupEventsResponse =
        serde_json::from_value(value).context("parse cloudtrail events")?;
    let mut events = Vec::with_capacity(response.events.len());
    for raw in response.events {
        let detail: TrailDetail = match raw.cloud_trail_event.as_deref() {
            Some(text) => serde_json::from_str(text)
                .with_context(|| format!("parse CloudTrailEvent of {}", raw.event_name))?,
            None => TrailDetail::default(),
        };
        events.push(ChangeEvent {
            event_name: raw.event_name,
            event_time: raw.event_time,
            event_source: raw.event_source,
            username: raw.username,
            resources: raw
                .resources
                .into_iter()
                .filter_map(|r| r.resource_name)
                .collect(),
            error_code: detail.error_code,
            request_parameters: detail.request_parameters.filter(|v| !v.is_null()),
        });
    }
    events.sort_by(|a, b| b.event_time.cmp(&a.event_time));
    Ok(events)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScalingGroupsResponse {
    #[serde(default)]
    auto_scaling_groups: Vec<RawScalingGroup>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawScalingGroup {
    auto_scaling_group_name: String,
    min_size: u32,
    max_size: u32,
    desired_capacity: u32,
    #[serde(default)]
    instances: Vec<RawScalingInstance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawScalingInstance {
    #[serde(default)]
    lifecycle_state: Option<String>,
}

/// First scaling group in the response, without activities.
pub fn parse_scaling_group(value: Value) -> Result<Option<ScalingConfig>> {
    let response: ScalingGroupsResponse =
        serde_json::from_value(value).context("parse auto scaling groups")?;
    Ok(response.auto_scaling_groups.into_iter().next().map(|group| {
        let in_service = group
            .instances
            .iter()
            .filter(|i| i.lifecycle_state.as_deref() == Some("InService"))
            .count();
        ScalingConfig {
            enabled: true,
            group_name: Some(group.auto_scaling_group_name),
            min_capacity: group.min_size,
            max_capacity: group.max_size,
            desired_capacity: group.desired_capacity,
            current_capacity: u32::try_from(in_service).unwrap_or(u32::MAX),
            activities: Vec::new(),
        }
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScalingActivitiesResponse {
    #[serde(default)]
    activities: Vec<RawScalingActivity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawScalingActivity {
    start_time: DateTime<Utc>,
    status_code: String,
    #[serde(default)]
    description: String,
}

pub fn parse_scaling_activities(value: Value) -> Result<Vec<ScalingActivity>> {
    let response: ScalingActivitiesResponse =
        serde_json::from_value(value).context("parse scaling activities")?;
    let mut activities: Vec<ScalingActivity> = response
        .activities
        .into_iter()
        .map(|a| ScalingActivity {
            time: a.start_time,
            status: a.status_code,
            description: a.description,
        })
        .collect();
    activities.sort_by(|a, b| b.time.cmp(&a.time));
    Ok(activities)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CostAndUsageResponse {
    #[serde(default)]
    results_by_time: Vec<RawCostPeriod>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCostPeriod {
    time_period: RawPeriod,
    #[serde(default)]
    groups: Vec<RawCostGroup>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPeriod {
    start: NaiveDate,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCostGroup {
    keys: Vec<String>,
    metrics: BTreeMap<String, RawAmount>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawAmount {
    amount: String,
}

pub fn parse_cost_and_usage(value: Value) -> Result<CostBreakdown> {
    let response: CostAndUsageResponse =
        serde_json::from_value(value).context("parse cost and usage")?;
    let mut breakdown = CostBreakdown::default();
    for period in response.results_by_time {
        let mut day_total = 0.0;
        for group in period.groups {
            let service = group
                .keys
                .into_iter()
                .next()
                .unwrap_or_else(|| "Other".to_string());
            let amount: f64 = match group.metrics.get("UnblendedCost") {
                Some(raw) => raw
                    .amount
                    .parse()
                    .with_context(|| format!("parse cost amount '{}'", raw.amount))?,
                None => 0.0,
            };
            *breakdown.by_service.entry(service).or_default() += amount;
            day_total += amount;
        }
        breakdown.daily.push(DailyCost {
            date: period.time_period.start,
            amount: round_cents(day_total),
        });
        breakdown.total += day_total;
    }
    breakdown.total = round_cents(breakdown.total);
    for amount in breakdown.by_service.values_mut() {
        *amount = round_cents(*amount);
    }
    breakdown.daily.sort_by_key(|d| d.date);
    Ok(breakdown)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
