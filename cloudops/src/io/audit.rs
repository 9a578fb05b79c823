//! Append-only audit trail, one JSON line per finished investigation.
//!
//! Files are named `audit-YYYY-MM-DD.jsonl` (UTC) inside the audit directory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::core::types::{IncidentClass, RiskLevel, RunStatus};

/// Which path produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    Investigation,
    Playbook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub mode: AuditMode,
    pub query: String,
    pub incident_class: Option<IncidentClass>,
    pub plan_id: String,
    pub step_risks: Vec<RiskLevel>,
    pub highest_risk: RiskLevel,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub steps_executed: usize,
    pub status: RunStatus,
}

impl AuditRecord {
    /// Fresh id, current time and `$USER`; the highest risk is derived from
    /// `step_risks` (read when there are none).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: AuditMode,
        query: &str,
        incident_class: Option<IncidentClass>,
        plan_id: &str,
        step_risks: Vec<RiskLevel>,
        cost_usd: f64,
        duration_ms: u64,
        steps_executed: usize,
        status: RunStatus,
    ) -> Self {
        let highest_risk = step_risks.iter().copied().max().unwrap_or(RiskLevel::Read);
        Self {
            audit_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user: current_user(),
            mode,
            query: query.to_string(),
            incident_class,
            plan_id: plan_id.to_string(),
            step_risks,
            highest_risk,
            cost_usd,
            duration_ms,
            steps_executed,
            status,
        }
    }
}

pub fn current_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Destination for audit records. Only ever appended to.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    dir: PathBuf,
}

impl JsonlAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("audit-{}.jsonl", timestamp.format("%Y-%m-%d")))
    }

    /// Records at or after `cutoff`, optionally for one user, oldest first.
    /// Lines that fail to parse are skipped with a warning.
    pub fn read_entries(
        &self,
        cutoff: DateTime<Utc>,
        user: Option<&str>,
    ) -> Result<Vec<AuditRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?
        {
            let path = entry.context("read audit dir entry")?.path();
            let is_audit_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("audit-") && name.ends_with(".jsonl"));
            if is_audit_file {
                files.push(path);
            }
        }
        files.sort();

        let mut records = Vec::new();
        for path in files {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            for (index, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: AuditRecord = match serde_json::from_str(line) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(file = %path.display(), line = index + 1, error = %err, "skipping malformed audit line");
                        continue;
                    }
                };
                if record.timestamp < cutoff {
                    continue;
                }
                if user.is_some_and(|user| record.user != user) {
                    continue;
                }
                records.push(record);
            }
        }
        records.sort_by_key(|record| record.timestamp);
        Ok(records)
    }
}

impl AuditSink for JsonlAuditLog {
    #[instrument(skip_all, fields(plan_id = %record.plan_id, status = %record.status))]
    fn append(&self, record: &AuditRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create audit dir {}", self.dir.display()))?;
        let path = self.file_for(record.timestamp);
        let mut line = serde_json::to_string(record).context("serialize audit record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))?;
        Ok(())
    }
}

/// Parse a lookback window such as `24h` or `7d`.
pub fn parse_window(raw: &str) -> Result<TimeDelta> {
    let raw = raw.trim();
    let Some(unit) = raw.chars().last() else {
        bail!("window must not be empty");
    };
    let digits = &raw[..raw.len() - unit.len_utf8()];
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("invalid window '{raw}' (expected e.g. 24h or 7d)"))?;
    if amount <= 0 {
        bail!("window must be positive, got '{raw}'");
    }
    let delta = match unit {
        'h' => TimeDelta::try_hours(amount),
        'd' => TimeDelta::try_days(amount),
        _ => bail!("invalid window '{raw}' (expected e.g. 24h or 7d)"),
    };
    delta.with_context(|| format!("window '{raw}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, age: TimeDelta) -> AuditRecord {
        let mut record = AuditRecord::new(
            AuditMode::Investigation,
            "high cpu on prod cluster",
            Some(IncidentClass::ResourceSaturation),
            "plan-1234abcd",
            vec![RiskLevel::Read, RiskLevel::Read],
            0.02,
            1500,
            2,
            RunStatus::Completed,
        );
        record.user = user.to_string();
        record.timestamp = Utc::now() - age;
        record
    }

    #[test]
    fn highest_risk_defaults_to_read() {
        let record = AuditRecord::new(
            AuditMode::Playbook,
            "q",
            None,
            "p",
            Vec::new(),
            0.0,
            0,
            0,
            RunStatus::Failed,
        );
        assert_eq!(record.highest_risk, RiskLevel::Read);
    }

    #[test]
    fn append_writes_one_line_per_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = JsonlAuditLog::new(temp.path().join("audit"));
        let first = record("alice", TimeDelta::zero());
        log.append(&first).expect("append");
        log.append(&record("bob", TimeDelta::zero())).expect("append");

        let contents = fs::read_to_string(log.file_for(first.timestamp)).expect("read");
        assert_eq!(contents.lines().count(), 2);
        let parsed: AuditRecord =
            serde_json::from_str(contents.lines().next().expect("line")).expect("parse");
        assert_eq!(parsed, first);
    }

    #[test]
    fn read_entries_filters_by_cutoff_and_user() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = JsonlAuditLog::new(temp.path());
        log.append(&record("alice", TimeDelta::hours(1))).expect("append");
        log.append(&record("bob", TimeDelta::hours(2))).expect("append");
        log.append(&record("alice", TimeDelta::days(3))).expect("append");

        let cutoff = Utc::now() - TimeDelta::hours(24);
        assert_eq!(log.read_entries(cutoff, None).expect("read").len(), 2);
        let alice = log.read_entries(cutoff, Some("alice")).expect("read");
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].user, "alice");

        let week = Utc::now() - TimeDelta::days(7);
        assert_eq!(log.read_entries(week, Some("alice")).expect("read").len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = JsonlAuditLog::new(temp.path());
        let good = record("alice", TimeDelta::zero());
        log.append(&good).expect("append");
        let path = log.file_for(good.timestamp);
        let mut file = OpenOptions::new().append(true).open(&path).expect("open");
        file.write_all(b"{not json}\n").expect("write");

        let entries = log
            .read_entries(Utc::now() - TimeDelta::hours(1), None)
            .expect("read");
        assert_eq!(entries, vec![good]);
    }

    #[test]
    fn missing_dir_reads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = JsonlAuditLog::new(temp.path().join("absent"));
        assert!(log.read_entries(Utc::now(), None).expect("read").is_empty());
    }

    #[test]
    fn windows_parse_hours_and_days() {
        assert_eq!(parse_window("24h").expect("24h"), TimeDelta::hours(24));
        assert_eq!(parse_window("7d").expect("7d"), TimeDelta::days(7));
        assert!(parse_window("7w").is_err());
        assert!(parse_window("h").is_err());
        assert!(parse_window("0h").is_err());
        assert!(parse_window("").is_err());
    }
}
