//! Change-event primitives: what changed, how, and who was refused.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::core::context::SharedContext;
use crate::core::types::{Facts, PrimitiveKind};
use crate::io::cloud::{ChangeEvent, CloudApi, ResourceTarget, TimeWindow};

use super::{Primitive, to_facts};

/// Events listed per category in the facts.
const LISTED_EVENTS: usize = 5;

const MODIFICATION_EVENTS: &[&str] = &[
    "ModifyDBInstance",
    "ModifyDBParameterGroup",
    "UpdateFunctionConfiguration",
    "ModifyInstanceAttribute",
    "PutBucketPolicy",
    "UpdateAutoScalingGroup",
    "AuthorizeSecurityGroupIngress",
    "RevokeSecurityGroupIngress",
];
const DEPLOYMENT_EVENTS: &[&str] = &[
    "CreateDeployment",
    "UpdateService",
    "RunTask",
    "UpdateFunctionCode",
];
const DENIAL_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "Client.UnauthorizedOperation",
];

pub fn is_modification(event: &ChangeEvent) -> bool {
    MODIFICATION_EVENTS.contains(&event.event_name.as_str())
}

pub fn is_deployment(event: &ChangeEvent) -> bool {
    DEPLOYMENT_EVENTS.contains(&event.event_name.as_str())
}

fn is_denied(event: &ChangeEvent) -> bool {
    event
        .error_code
        .as_deref()
        .is_some_and(|code| DENIAL_CODES.contains(&code))
}

/// IAM writes; reads (`Get*`, `List*`) are not changes.
fn is_iam_change(event: &ChangeEvent) -> bool {
    event.event_source.as_deref() == Some("iam.amazonaws.com")
        && !event.event_name.starts_with("Get")
        && !event.event_name.starts_with("List")
}

#[derive(Serialize)]
struct EventSummary<'a> {
    event_name: &'a str,
    event_time: DateTime<Utc>,
    username: Option<&'a str>,
    resources: &'a [String],
}

impl<'a> From<&'a ChangeEvent> for EventSummary<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        Self {
            event_name: &event.event_name,
            event_time: event.event_time,
            username: event.username.as_deref(),
            resources: &event.resources,
        }
    }
}

fn summaries<'a>(events: impl Iterator<Item = &'a ChangeEvent>) -> Vec<EventSummary<'a>> {
    events.take(LISTED_EVENTS).map(EventSummary::from).collect()
}

fn lookback_events(cloud: &dyn CloudApi, context: &SharedContext) -> Result<Vec<ChangeEvent>> {
    cloud.lookup_change_events(
        &ResourceTarget::from_context(context),
        &TimeWindow::last_hours(context.lookback_hours),
    )
}

/// Modifications and deployments inside the lookback window.
pub struct RecentChanges {
    cloud: Arc<dyn CloudApi>,
}

impl RecentChanges {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for RecentChanges {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckRecentChanges
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let events = lookback_events(self.cloud.as_ref(), context)?;
        let modifications: Vec<&ChangeEvent> = events.iter().filter(|e| is_modification(e)).collect();
        let deployments: Vec<&ChangeEvent> = events.iter().filter(|e| is_deployment(e)).collect();
        let facts = json!({
            "lookback_hours": context.lookback_hours,
            "total_events": events.len(),
            "modification_count": modifications.len(),
            "deployment_count": deployments.len(),
            "recent_modifications": summaries(modifications.iter().copied()),
            "recent_deployments": summaries(deployments.iter().copied()),
            "has_recent_changes": !modifications.is_empty() || !deployments.is_empty(),
        });
        to_facts(&facts)
    }
}

/// Request parameters of modification events, i.e. what each change set.
pub struct ConfigurationDiff {
    cloud: Arc<dyn CloudApi>,
}

impl ConfigurationDiff {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for ConfigurationDiff {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::DiffConfiguration
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let events = lookback_events(self.cloud.as_ref(), context)?;
        let mut changed_fields = BTreeSet::new();
        let mut changes = Vec::new();
        for event in events.iter().filter(|e| is_modification(e)) {
            if let Some(Value::Object(params)) = &event.request_parameters {
                changed_fields.extend(params.keys().cloned());
            }
            changes.push(json!({
                "event_name": event.event_name,
                "event_time": event.event_time,
                "username": event.username,
                "parameters": event.request_parameters,
            }));
        }
        let facts = json!({
            "lookback_hours": context.lookback_hours,
            "change_count": changes.len(),
            "changes": changes,
            "changed_fields": changed_fields,
            "has_configuration_changes": !changes.is_empty(),
        });
        to_facts(&facts)
    }
}

/// Access-denied errors and IAM policy changes.
pub struct PermissionAudit {
    cloud: Arc<dyn CloudApi>,
}

impl PermissionAudit {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for PermissionAudit {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckPermissions
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let events = lookback_events(self.cloud.as_ref(), context)?;
        let denied: Vec<&ChangeEvent> = events.iter().filter(|e| is_denied(e)).collect();
        let iam_changes: Vec<&ChangeEvent> = events.iter().filter(|e| is_iam_change(e)).collect();
        let denied_principals: BTreeSet<&str> =
            denied.iter().filter_map(|e| e.username.as_deref()).collect();
        let facts = json!({
            "lookback_hours": context.lookback_hours,
            "access_denied_count": denied.len(),
            "access_denied": denied.iter().take(LISTED_EVENTS).map(|e| json!({
                "event_name": e.event_name,
                "event_source": e.event_source,
                "event_time": e.event_time,
                "username": e.username,
                "error_code": e.error_code,
            })).collect::<Vec<_>>(),
            "denied_principals": denied_principals,
            "iam_change_count": iam_changes.len(),
            "iam_changes": iam_changes.iter().take(LISTED_EVENTS).map(|e| json!({
                "event_name": e.event_name,
                "event_time": e.event_time,
                "username": e.username,
                "parameters": e.request_parameters,
            })).collect::<Vec<_>>(),
        });
        to_facts(&facts)
    }
}
