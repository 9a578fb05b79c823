//! Firewall-rule primitives: dependencies, reachability and exposure.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::context::SharedContext;
use crate::core::types::{Facts, PrimitiveKind};
use crate::io::cloud::{CloudApi, RuleAction, RuleDirection, RuleSource, SecurityRule};

use super::{Primitive, to_facts};

/// Ports whose exposure to the internet is worth calling out.
const SENSITIVE_PORTS: &[u16] = &[22, 3389, 3306, 5432, 6379, 27017];
/// Catch-all ACL entry present in every network ACL.
const DEFAULT_ACL_RULE: u32 = 32767;

pub fn well_known_service(port: u16) -> Option<&'static str> {
    Some(match port {
        80 => "http",
        443 => "https",
        3306 => "mysql",
        5432 => "postgresql",
        5672 => "amqp",
        6379 => "redis",
        9092 => "kafka",
        9200 => "elasticsearch",
        11211 => "memcached",
        27017 => "mongodb",
        _ => return None,
    })
}

/// A downstream service inferred from an egress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub service: String,
    pub port: u16,
    pub destination: Option<String>,
    pub group_id: String,
}

fn is_sg_egress(rule: &SecurityRule) -> bool {
    rule.source == RuleSource::SecurityGroup
        && rule.direction == RuleDirection::Egress
        && rule.action == RuleAction::Allow
}

/// Dependencies from single-port egress rules on well-known ports, plus the
/// number of egress rules that did not map to one.
pub fn dependencies_from_rules(rules: &[SecurityRule]) -> (Vec<Dependency>, usize) {
    let mut dependencies = Vec::new();
    let mut unclassified = 0;
    for rule in rules.iter().filter(|r| is_sg_egress(r)) {
        let service = match (rule.from_port, rule.to_port) {
            (Some(from), Some(to)) if from == to => well_known_service(from).map(|s| (s, from)),
            _ => None,
        };
        match service {
            Some((service, port)) => dependencies.push(Dependency {
                service: service.to_string(),
                port,
                destination: rule.cidr.clone(),
                group_id: rule.group_id.clone(),
            }),
            None => unclassified += 1,
        }
    }
    (dependencies, unclassified)
}

pub struct TraceDependencies {
    cloud: Arc<dyn CloudApi>,
}

impl TraceDependencies {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for TraceDependencies {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::TraceDependencies
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let rules = self.cloud.list_security_rules()?;
        let (dependencies, unclassified) = dependencies_from_rules(&rules);
        let facts = json!({
            "dependency_count": dependencies.len(),
            "dependencies": dependencies,
            "unclassified_egress_rules": unclassified,
        });
        to_facts(&facts)
    }
}

/// Outcome of evaluating one dependency against the network ACLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclVerdict {
    pub allowed: bool,
    pub acl_id: Option<String>,
    pub rule_number: Option<u32>,
}

/// First matching egress ACL entry by rule number decides. With no ACL rules
/// at all traffic is allowed.
pub fn evaluate_acls(rules: &[SecurityRule], dependency: &Dependency) -> AclVerdict {
    let mut entries: Vec<&SecurityRule> = rules
        .iter()
        .filter(|r| r.source == RuleSource::NetworkAcl && r.direction == RuleDirection::Egress)
        .collect();
    entries.sort_by_key(|r| r.rule_number.unwrap_or(u32::MAX));
    let matching = entries.into_iter().find(|rule| {
        rule.covers_port(dependency.port)
            && (rule.is_world_open() || rule.cidr.is_none() || rule.cidr == dependency.destination)
    });
    match matching {
        Some(rule) => AclVerdict {
            allowed: rule.action == RuleAction::Allow,
            acl_id: Some(rule.group_id.clone()),
            rule_number: rule.rule_number,
        },
        None => AclVerdict {
            allowed: true,
            acl_id: None,
            rule_number: None,
        },
    }
}

/// Checks each dependency against network ACL deny rules. Reuses the
/// dependencies traced earlier in the same plan when present.
pub struct CheckConnectivity {
    cloud: Arc<dyn CloudApi>,
}

impl CheckConnectivity {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

fn traced_dependencies(context: &SharedContext) -> Result<Option<Vec<Dependency>>> {
    let Some(facts) = context.enrichment(PrimitiveKind::TraceDependencies) else {
        return Ok(None);
    };
    let Some(value) = facts.get("dependencies") else {
        return Ok(None);
    };
    let dependencies = serde_json::from_value(value.clone()).context("read traced dependencies")?;
    Ok(Some(dependencies))
}

impl Primitive for CheckConnectivity {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckConnectivity
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let rules = self.cloud.list_security_rules()?;
        let (dependencies, from_trace) = match traced_dependencies(context)? {
            Some(dependencies) => (dependencies, true),
            None => (dependencies_from_rules(&rules).0, false),
        };

        let mut reachable = Vec::new();
        let mut blocked = Vec::new();
        for dependency in &dependencies {
            let verdict = evaluate_acls(&rules, dependency);
            let entry = json!({
                "service": dependency.service,
                "port": dependency.port,
                "destination": dependency.destination,
                "acl_id": verdict.acl_id,
                "rule_number": verdict.rule_number,
            });
            if verdict.allowed {
                reachable.push(entry);
            } else {
                blocked.push(entry);
            }
        }
        let facts = json!({
            "used_traced_dependencies": from_trace,
            "checked": dependencies.len(),
            "reachable": reachable,
            "blocked": blocked,
            "all_reachable": blocked.is_empty(),
        });
        to_facts(&facts)
    }
}

fn is_sensitive(rule: &SecurityRule) -> bool {
    SENSITIVE_PORTS.iter().any(|port| rule.covers_port(*port))
}

fn is_default_acl_rule(rule: &SecurityRule) -> bool {
    rule.rule_number == Some(DEFAULT_ACL_RULE)
}

pub struct SecurityGroups {
    cloud: Arc<dyn CloudApi>,
}

impl SecurityGroups {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for SecurityGroups {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckSecurityGroups
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let rules = self.cloud.list_security_rules()?;
        let groups: BTreeSet<&str> = rules
            .iter()
            .filter(|r| r.source == RuleSource::SecurityGroup)
            .map(|r| r.group_id.as_str())
            .collect();
        let open: Vec<&SecurityRule> = rules
            .iter()
            .filter(|r| {
                r.source == RuleSource::SecurityGroup
                    && r.direction == RuleDirection::Ingress
                    && r.is_world_open()
            })
            .collect();
        let facts = json!({
            "groups_checked": groups.len(),
            "world_open_count": open.len(),
            "world_open_rules": open.iter().map(|r| json!({
                "group_id": r.group_id,
                "group_name": r.group_name,
                "protocol": r.protocol,
                "ports": r.port_label(),
                "cidr": r.cidr,
                "sensitive": is_sensitive(r),
            })).collect::<Vec<_>>(),
            "sensitive_exposures": open.iter().filter(|r| is_sensitive(r)).count(),
        });
        to_facts(&facts)
    }
}

pub struct NetworkAcls {
    cloud: Arc<dyn CloudApi>,
}

impl NetworkAcls {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for NetworkAcls {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckNetworkAcls
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let rules = self.cloud.list_security_rules()?;
        let acls: BTreeSet<&str> = rules
            .iter()
            .filter(|r| r.source == RuleSource::NetworkAcl)
            .map(|r| r.group_id.as_str())
            .collect();
        let denies: Vec<&SecurityRule> = rules
            .iter()
            .filter(|r| r.source == RuleSource::NetworkAcl && r.action == RuleAction::Deny)
            .collect();
        let facts = json!({
            "acl_count": acls.len(),
            "deny_rules": denies.iter().map(|r| json!({
                "acl_id": r.group_id,
                "rule_number": r.rule_number,
                "direction": r.direction,
                "ports": r.port_label(),
                "cidr": r.cidr,
                "default": is_default_acl_rule(r),
            })).collect::<Vec<_>>(),
            "explicit_deny_count": denies.iter().filter(|r| !is_default_acl_rule(r)).count(),
        });
        to_facts(&facts)
    }
}
