//! Metric series, baseline and cost primitives.

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Duration;
use serde::Serialize;

use crate::core::context::SharedContext;
use crate::core::types::{Facts, PrimitiveKind};
use crate::io::cloud::{CloudApi, Datapoint, MetricQuery, MetricSeries, ResourceTarget, TimeWindow};

use super::{Primitive, to_facts};

/// Datapoints kept in the facts for context.
const RECENT_POINTS: usize = 10;
/// Half-over-half change that counts as a trend, in percent.
const TREND_THRESHOLD_PCT: f64 = 10.0;
/// Deviation from baseline that counts as an anomaly, in percent.
const ANOMALY_THRESHOLD_PCT: f64 = 50.0;
const COST_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    Unknown,
}

/// Compare the mean of the second half of `values` with the first half.
pub fn trend(values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::Unknown;
    }
    let mid = values.len() / 2;
    let first = values[..mid].iter().sum::<f64>() / mid as f64;
    let second = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;
    let diff_pct = if first > 0.0 {
        (second - first) / first * 100.0
    } else {
        0.0
    };
    if diff_pct > TREND_THRESHOLD_PCT {
        Trend::Increasing
    } else if diff_pct < -TREND_THRESHOLD_PCT {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricSource {
    /// The classified metric, or a default when none was extracted.
    FromContext(&'static str),
    Fixed(&'static str),
}

#[derive(Serialize)]
struct SeriesFacts<'a> {
    metric: &'a str,
    namespace: &'a str,
    metric_name: &'a str,
    time_window_seconds: u64,
    datapoint_count: usize,
    current_value: Option<f64>,
    max_value: Option<f64>,
    min_value: Option<f64>,
    avg_value: Option<f64>,
    trend: Trend,
    datapoints: &'a [Datapoint],
}

/// Summary statistics over one metric series for the context window.
pub struct SeriesAnalysis {
    kind: PrimitiveKind,
    cloud: Arc<dyn CloudApi>,
    source: MetricSource,
}

impl SeriesAnalysis {
    pub fn from_context(kind: PrimitiveKind, cloud: Arc<dyn CloudApi>, default: &'static str) -> Self {
        Self {
            kind,
            cloud,
            source: MetricSource::FromContext(default),
        }
    }

    pub fn fixed(kind: PrimitiveKind, cloud: Arc<dyn CloudApi>, metric: &'static str) -> Self {
        Self {
            kind,
            cloud,
            source: MetricSource::Fixed(metric),
        }
    }

    fn metric<'a>(&self, context: &'a SharedContext) -> &'a str {
        match self.source {
            MetricSource::FromContext(default) => context.metric_or(default),
            MetricSource::Fixed(metric) => metric,
        }
    }
}

impl Primitive for SeriesAnalysis {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let metric = self.metric(context);
        let query = MetricQuery::for_resource(
            &ResourceTarget::from_context(context),
            metric,
            TimeWindow::ending_now(context.time_window),
        );
        let series = self.cloud.fetch_metric_series(&query)?;
        let recent_start = series.datapoints.len().saturating_sub(RECENT_POINTS);
        to_facts(&SeriesFacts {
            metric,
            namespace: &query.namespace,
            metric_name: &query.metric_name,
            time_window_seconds: context.time_window,
            datapoint_count: series.datapoints.len(),
            current_value: series.datapoints.last().map(|dp| dp.average),
            max_value: series.max(),
            min_value: series.min(),
            avg_value: series.mean(),
            trend: trend(&series.averages()),
            datapoints: &series.datapoints[recent_start..],
        })
    }
}

/// Current window against the same window 24 hours earlier.
pub struct BaselineComparison {
    cloud: Arc<dyn CloudApi>,
}

impl BaselineComparison {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }

    fn fetch(&self, target: &ResourceTarget, metric: &str, window: TimeWindow) -> Result<MetricSeries> {
        let series = self
            .cloud
            .fetch_metric_series(&MetricQuery::for_resource(target, metric, window))?;
        if series.datapoints.is_empty() {
            bail!(
                "no {metric} datapoints between {} and {}",
                window.start.to_rfc3339(),
                window.end.to_rfc3339()
            );
        }
        Ok(series)
    }
}

impl Primitive for BaselineComparison {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CompareBaseline
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let metric = context.metric_or("cpu");
        let target = ResourceTarget::from_context(context);
        let current_window = TimeWindow::ending_now(context.time_window);
        let current = self.fetch(&target, metric, current_window)?;
        let baseline = self.fetch(&target, metric, current_window.shifted_back(Duration::days(1)))?;

        let current_avg = current.mean().unwrap_or_default();
        let baseline_avg = baseline.mean().unwrap_or_default();
        let deviation_percent = if baseline_avg > 0.0 {
            (current_avg - baseline_avg) / baseline_avg * 100.0
        } else {
            0.0
        };
        let facts = serde_json::json!({
            "metric": metric,
            "current_avg": current_avg,
            "current_max": current.max(),
            "baseline_avg": baseline_avg,
            "baseline_max": baseline.max(),
            "deviation_percent": round2(deviation_percent),
            "is_anomaly": deviation_percent.abs() > ANOMALY_THRESHOLD_PCT,
            "comparison_period": "same_time_yesterday",
        });
        to_facts(&facts)
    }
}

/// Spend over the last 30 days, by service and by day.
pub struct CostTrend {
    cloud: Arc<dyn CloudApi>,
}

impl CostTrend {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for CostTrend {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::AnalyzeCostTrend
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let window = TimeWindow::ending_now(COST_WINDOW_DAYS as u64 * 86_400);
        let breakdown = self.cloud.fetch_cost_breakdown(&window)?;
        let top_service = breakdown
            .by_service
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, amount)| {
                let share = if breakdown.total > 0.0 {
                    amount / breakdown.total * 100.0
                } else {
                    0.0
                };
                serde_json::json!({
                    "service": name,
                    "amount_usd": amount,
                    "share_percent": round2(share),
                })
            });
        let daily: Vec<f64> = breakdown.daily.iter().map(|day| day.amount).collect();
        let average_daily = if daily.is_empty() {
            None
        } else {
            Some(round2(daily.iter().sum::<f64>() / daily.len() as f64))
        };
        let facts = serde_json::json!({
            "period_days": COST_WINDOW_DAYS,
            "total_usd": breakdown.total,
            "by_service": breakdown.by_service,
            "top_service": top_service,
            "daily_trend": trend(&daily),
            "average_daily_usd": average_daily,
            "latest_daily_usd": daily.last(),
        });
        to_facts(&facts)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
