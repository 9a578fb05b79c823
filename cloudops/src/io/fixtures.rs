//! Offline collaborators with deterministic data.
//!
//! Used when `cloud.use_real_apis = false` so the whole pipeline can run
//! without credentials. Timestamps are placed relative to the requested
//! window, so lookback filters behave the same as against a live account.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;

use crate::io::cloud::{
    ChangeEvent, CloudApi, CostBreakdown, DailyCost, Datapoint, MetricQuery, MetricSeries,
    ResourceTarget, RuleAction, RuleDirection, RuleSource, ScalingActivity, ScalingConfig,
    SecurityRule, TimeWindow,
};
use crate::io::orchestrator::{
    ClusterNode, Deployment, NamespaceSelector, OrchestratorApi, Workload,
};

const FIXTURE_POINTS: i32 = 12;
const FIXTURE_MONTHLY_TOTAL: f64 = 1250.45;

#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureCloud;

/// `(baseline, peak)` for a metric name.
fn metric_profile(metric_name: &str) -> (f64, f64) {
    let name = metric_name.to_ascii_lowercase();
    if name.contains("error") || name.contains("5xx") {
        (2.0, 14.0)
    } else if name.contains("latency") || name.contains("duration") {
        (120.0, 480.0)
    } else if name.contains("lag") {
        (0.5, 9.0)
    } else if name.contains("throttl") || name.contains("usererrors") {
        (0.0, 25.0)
    } else {
        (45.0, 92.3)
    }
}

impl CloudApi for FixtureCloud {
    /// Windows ending more than 12h ago get the flat baseline; recent windows
    /// ramp from baseline to peak.
    fn fetch_metric_series(&self, query: &MetricQuery) -> Result<MetricSeries> {
        let (baseline, peak) = metric_profile(&query.metric_name);
        let historical = query.window.end < Utc::now() - Duration::hours(12);
        let step = (query.window.end - query.window.start) / FIXTURE_POINTS;
        let datapoints = (0..FIXTURE_POINTS)
            .map(|i| {
                let average = if historical {
                    baseline
                } else {
                    baseline + (peak - baseline) * f64::from(i) / f64::from(FIXTURE_POINTS - 1)
                };
                Datapoint {
                    timestamp: query.window.start + step * i,
                    average,
                    maximum: average * 1.05,
                    minimum: average * 0.95,
                }
            })
            .collect();
        Ok(MetricSeries::new(datapoints))
    }

    fn list_security_rules(&self) -> Result<Vec<SecurityRule>> {
        let sg = |direction, protocol: &str, port: Option<u16>, cidr: &str| SecurityRule {
            source: RuleSource::SecurityGroup,
            group_id: "sg-12345".to_string(),
            group_name: Some("web-servers".to_string()),
            direction,
            action: RuleAction::Allow,
            protocol: protocol.to_string(),
            from_port: port,
            to_port: port,
            cidr: Some(cidr.to_string()),
            rule_number: None,
        };
        let acl = |number, direction, action, port: Option<u16>, cidr: &str| SecurityRule {
            source: RuleSource::NetworkAcl,
            group_id: "acl-0a1b2c".to_string(),
            group_name: None,
            direction,
            action,
            protocol: if port.is_some() { "6" } else { "-1" }.to_string(),
            from_port: port,
            to_port: port,
            cidr: Some(cidr.to_string()),
            rule_number: Some(number),
        };
        Ok(vec![
            sg(RuleDirection::Ingress, "tcp", Some(80), "0.0.0.0/0"),
            sg(RuleDirection::Ingress, "tcp", Some(22), "0.0.0.0/0"),
            sg(RuleDirection::Egress, "tcp", Some(5432), "10.0.2.0/24"),
            sg(RuleDirection::Egress, "tcp", Some(6379), "10.0.3.0/24"),
            sg(RuleDirection::Egress, "tcp", Some(443), "0.0.0.0/0"),
            acl(90, RuleDirection::Egress, RuleAction::Deny, Some(6379), "10.0.3.0/24"),
            acl(100, RuleDirection::Egress, RuleAction::Allow, None, "0.0.0.0/0"),
            acl(32767, RuleDirection::Egress, RuleAction::Deny, None, "0.0.0.0/0"),
        ])
    }

    fn lookup_change_events(
        &self,
        target: &ResourceTarget,
        window: &TimeWindow,
    ) -> Result<Vec<ChangeEvent>> {
        let resource = target
            .resource_id
            .clone()
            .unwrap_or_else(|| "orders-db".to_string());
        let now = Utc::now();
        let event = |name: &str, minutes_ago: i64, source: &str| ChangeEvent {
            event_name: name.to_string(),
            event_time: now - Duration::minutes(minutes_ago),
            event_source: Some(source.to_string()),
            username: Some("deploy-bot".to_string()),
            resources: vec![resource.clone()],
            error_code: None,
            request_parameters: None,
        };

        let mut modify = event("ModifyDBInstance", 120, "rds.amazonaws.com");
        modify.username = Some("alice".to_string());
        modify.request_parameters = Some(json!({
            "dBInstanceIdentifier": resource,
            "dBInstanceClass": "db.t3.medium",
            "applyImmediately": true
        }));
        let mut policy = event("PutRolePolicy", 180, "iam.amazonaws.com");
        policy.request_parameters = Some(json!({"roleName": "app-role", "policyName": "s3-access"}));
        let mut denied = event("GetObject", 60, "s3.amazonaws.com");
        denied.error_code = Some("AccessDenied".to_string());

        let mut events: Vec<ChangeEvent> = vec![
            event("UpdateService", 40, "ecs.amazonaws.com"),
            denied,
            modify,
            policy,
            event("RunTask", 26 * 60, "ecs.amazonaws.com"),
        ]
        .into_iter()
        .filter(|e| window.contains(e.event_time))
        .collect();
        events.sort_by(|a, b| b.event_time.cmp(&a.event_time));
        Ok(events)
    }

    fn describe_scaling_config(&self, _target: &ResourceTarget) -> Result<ScalingConfig> {
        let now = Utc::now();
        Ok(ScalingConfig {
            enabled: true,
            group_name: Some("web-asg".to_string()),
            min_capacity: 2,
            max_capacity: 6,
            desired_capacity: 6,
            current_capacity: 6,
            activities: vec![
                ScalingActivity {
                    time: now - Duration::minutes(25),
                    status: "Successful".to_string(),
                    description: "Launching a new EC2 instance".to_string(),
                },
                ScalingActivity {
                    time: now - Duration::minutes(55),
                    status: "Successful".to_string(),
                    description: "Launching a new EC2 instance".to_string(),
                },
            ],
        })
    }

    fn fetch_cost_breakdown(&self, window: &TimeWindow) -> Result<CostBreakdown> {
        let days = (window.end - window.start).num_days().max(1);
        let weights: Vec<f64> = (0..days)
            .map(|i| 1.0 + i as f64 / days as f64)
            .collect();
        let weight_sum: f64 = weights.iter().sum();
        let first_day = window.start.date_naive();
        let daily = weights
            .iter()
            .zip(0..)
            .map(|(w, i)| DailyCost {
                date: first_day + Duration::days(i),
                amount: (FIXTURE_MONTHLY_TOTAL * w / weight_sum * 100.0).round() / 100.0,
            })
            .collect();
        let by_service = BTreeMap::from([
            ("EC2".to_string(), 650.20),
            ("RDS".to_string(), 300.15),
            ("S3".to_string(), 200.10),
            ("Other".to_string(), 100.00),
        ]);
        Ok(CostBreakdown {
            total: FIXTURE_MONTHLY_TOTAL,
            by_service,
            daily,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureOrchestrator;

impl OrchestratorApi for FixtureOrchestrator {
    fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let node = |name: &str, pressure: &[&str]| ClusterNode {
            name: name.to_string(),
            ready: true,
            cpu_allocatable: Some("4".to_string()),
            memory_allocatable: Some("16Gi".to_string()),
            pressure: pressure.iter().map(|p| (*p).to_string()).collect(),
        };
        Ok(vec![
            node("node-1", &["MemoryPressure"]),
            node("node-2", &[]),
            node("node-3", &[]),
        ])
    }

    fn list_workloads(&self, namespace: &NamespaceSelector) -> Result<Vec<Workload>> {
        let pod = |name: &str, ns: &str, phase: &str, ready: bool, restarts: u32, cpu: f64| {
            Workload {
                name: name.to_string(),
                namespace: ns.to_string(),
                phase: phase.to_string(),
                ready,
                restarts,
                cpu_request_cores: cpu,
                memory_request: Some("1Gi".to_string()),
                node: Some("node-1".to_string()),
            }
        };
        let all = vec![
            pod("api-gateway-7d8f9", "prod", "Running", true, 0, 3.2),
            pod("worker-abc123", "prod", "Running", false, 4, 1.5),
            pod("cache-0", "prod", "Running", true, 0, 0.5),
            pod("report-batch-x1", "jobs", "Pending", false, 0, 1.0),
            pod("coredns-5d78c", "kube-system", "Running", true, 0, 0.1),
        ];
        Ok(filter_namespace(all, namespace, |w| &w.namespace))
    }

    fn list_deployments(&self, namespace: &NamespaceSelector) -> Result<Vec<Deployment>> {
        let now = Utc::now();
        let all = vec![
            Deployment {
                name: "api-gateway".to_string(),
                namespace: "prod".to_string(),
                desired_replicas: 3,
                ready_replicas: 3,
                available_replicas: 3,
                updated_replicas: 3,
                images: vec!["registry.local/api-gateway:v2.3.1".to_string()],
                revision: Some("12".to_string()),
                created: Some(now - Duration::days(90)),
                last_update: Some(now - Duration::hours(1)),
            },
            Deployment {
                name: "worker".to_string(),
                namespace: "prod".to_string(),
                desired_replicas: 2,
                ready_replicas: 1,
                available_replicas: 1,
                updated_replicas: 2,
                images: vec!["registry.local/worker:v1.9.0".to_string()],
                revision: Some("4".to_string()),
                created: Some(now - Duration::days(200)),
                last_update: Some(now - Duration::days(30)),
            },
        ];
        Ok(filter_namespace(all, namespace, |d| &d.namespace))
    }
}

fn filter_namespace<T>(
    items: Vec<T>,
    selector: &NamespaceSelector,
    namespace_of: impl Fn(&T) -> &String,
) -> Vec<T> {
    match selector {
        NamespaceSelector::All => items,
        NamespaceSelector::Named(ns) => items
            .into_iter()
            .filter(|item| namespace_of(item) == ns)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_series_ramps_and_historical_series_is_flat() {
        let target = ResourceTarget {
            resource_type: Some("ec2".to_string()),
            resource_id: Some("i-1".to_string()),
        };
        let window = TimeWindow::ending_now(3600);
        let recent = FixtureCloud
            .fetch_metric_series(&MetricQuery::for_resource(&target, "cpu", window))
            .expect("series");
        let old = FixtureCloud
            .fetch_metric_series(&MetricQuery::for_resource(
                &target,
                "cpu",
                window.shifted_back(Duration::days(1)),
            ))
            .expect("series");
        assert_eq!(recent.datapoints.len(), 12);
        assert!(recent.averages()[11] > recent.averages()[0]);
        assert!(old.averages().iter().all(|v| (*v - 45.0).abs() < 1e-9));
    }

    #[test]
    fn change_events_respect_the_window() {
        let events = FixtureCloud
            .lookup_change_events(&ResourceTarget::default(), &TimeWindow::last_hours(24))
            .expect("events");
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].event_name, "UpdateService");
        let short = FixtureCloud
            .lookup_change_events(&ResourceTarget::default(), &TimeWindow::last_hours(1))
            .expect("events");
        assert_eq!(short.len(), 2);
    }

    #[test]
    fn cost_breakdown_daily_sums_to_total() {
        let breakdown = FixtureCloud
            .fetch_cost_breakdown(&TimeWindow::ending_now(30 * 86_400))
            .expect("cost");
        assert_eq!(breakdown.daily.len(), 30);
        let sum: f64 = breakdown.daily.iter().map(|d| d.amount).sum();
        assert!((sum - breakdown.total).abs() < 0.5);
    }

    #[test]
    fn namespace_filter_applies_to_workloads() {
        let jobs = FixtureOrchestrator
            .list_workloads(&NamespaceSelector::Named("jobs".to_string()))
            .expect("workloads");
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            FixtureOrchestrator
                .list_workloads(&NamespaceSelector::All)
                .expect("workloads")
                .len(),
            5
        );
    }
}
