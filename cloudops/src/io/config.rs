//! Configuration stored at `$CLOUDOPS_HOME/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::policy::PolicyGate;
use crate::core::types::RiskLevel;
use crate::io::process::DEFAULT_OUTPUT_LIMIT_BYTES;

pub const CONFIG_FILE: &str = "config.toml";
pub const HOME_ENV: &str = "CLOUDOPS_HOME";

/// Top-level configuration (TOML). Missing fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CloudopsConfig {
    pub llm: LlmConfig,
    pub cloud: CloudConfig,
    pub orchestrator: OrchestratorConfig,
    pub policy: PolicyConfig,
    pub executor: ExecutorConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Command that reads a prompt on stdin and writes the completion to stdout.
    pub command: Vec<String>,
    pub model: Option<String>,
    /// Sampling temperature for interpretation. Classification always runs at 0.
    pub temperature: f32,
    /// Token limit for interpretation.
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            model: None,
            temperature: 0.1,
            max_tokens: 2000,
            timeout_secs: 120,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CloudConfig {
    /// `false` runs every primitive against offline fixtures.
    pub use_real_apis: bool,
    pub aws_command: Vec<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            use_real_apis: false,
            aws_command: vec!["aws".to_string()],
            region: None,
            profile: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub kubectl_command: Vec<String>,
    pub context: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            kubectl_command: vec!["kubectl".to_string()],
            context: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Risk levels that always need approval.
    pub require_approval_for: Vec<String>,
    /// Scopes where any non-read step needs approval.
    pub protected_scopes: Vec<String>,
    /// Classifications below this confidence are rejected.
    pub confidence_threshold: f64,
    /// Scope used when neither the caller nor the query names one.
    pub default_scope: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            require_approval_for: vec!["write".to_string(), "delete".to_string()],
            protected_scopes: vec!["prod".to_string(), "production".to_string()],
            confidence_threshold: 0.8,
            default_scope: "production".to_string(),
        }
    }
}

impl PolicyConfig {
    pub fn gate(&self) -> Result<PolicyGate> {
        let levels = self
            .require_approval_for
            .iter()
            .map(|level| level.parse::<RiskLevel>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PolicyGate::new(levels, self.protected_scopes.iter().cloned()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Budget for one primitive, including its provider calls.
    pub primitive_timeout_secs: u64,
    /// Optional budget for the whole plan. Steps that would start after it
    /// has run out are recorded as failed.
    pub run_timeout_secs: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            primitive_timeout_secs: 30,
            run_timeout_secs: None,
        }
    }
}

impl ExecutorConfig {
    pub fn primitive_timeout(&self) -> Duration {
        Duration::from_secs(self.primitive_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Defaults to `<home>/audit`.
    pub dir: Option<PathBuf>,
}

impl CloudopsConfig {
    pub fn validate(&self) -> Result<()> {
        if first_is_blank(&self.llm.command) {
            bail!("llm.command must be a non-empty array");
        }
        if self.llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be > 0");
        }
        if self.llm.max_tokens == 0 {
            bail!("llm.max_tokens must be > 0");
        }
        if self.llm.output_limit_bytes == 0 {
            bail!("llm.output_limit_bytes must be > 0");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be within [0, 2]");
        }
        if first_is_blank(&self.cloud.aws_command) {
            bail!("cloud.aws_command must be a non-empty array");
        }
        if first_is_blank(&self.orchestrator.kubectl_command) {
            bail!("orchestrator.kubectl_command must be a non-empty array");
        }
        if !(0.0..=1.0).contains(&self.policy.confidence_threshold) {
            bail!("policy.confidence_threshold must be within [0, 1]");
        }
        if self.policy.default_scope.trim().is_empty() {
            bail!("policy.default_scope must not be empty");
        }
        self.policy
            .gate()
            .context("policy.require_approval_for")?;
        if self.executor.primitive_timeout_secs == 0 {
            bail!("executor.primitive_timeout_secs must be > 0");
        }
        if self.executor.run_timeout_secs == Some(0) {
            bail!("executor.run_timeout_secs must be > 0");
        }
        Ok(())
    }

    pub fn audit_dir(&self, home: &Path) -> PathBuf {
        self.audit
            .dir
            .clone()
            .unwrap_or_else(|| home.join("audit"))
    }

    /// Output cap for cloud and orchestrator CLI calls.
    pub fn collaborator_output_limit(&self) -> usize {
        DEFAULT_OUTPUT_LIMIT_BYTES
    }
}

fn first_is_blank(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Resolve the home directory: explicit flag, then `$CLOUDOPS_HOME`, then
/// `~/.cloudops`.
pub fn resolve_home(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".cloudops"))
        .ok_or_else(|| anyhow!("cannot determine home directory; set {HOME_ENV}"))
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILE)
}

/// Load config from a TOML file. A missing file is an error.
pub fn load_config(path: &Path) -> Result<CloudopsConfig> {
    if !path.exists() {
        bail!(
            "config not found at {}; run `cloudops init`",
            path.display()
        );
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CloudopsConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CloudopsConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Return a copy of `cfg` with the dotted `key` set to `raw`.
///
/// `raw` is parsed as a TOML value when possible (`true`, `0.7`,
/// `["prod"]`) and taken as a plain string otherwise. Unknown keys and
/// values that fail validation are rejected.
pub fn set_config_value(cfg: &CloudopsConfig, key: &str, raw: &str) -> Result<CloudopsConfig> {
    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| anyhow!("config key must look like section.field, got '{key}'"))?;
    if field.is_empty() || field.contains('.') {
        bail!("config key must look like section.field, got '{key}'");
    }

    let mut table: toml::Table =
        toml::from_str(&toml::to_string(cfg).context("serialize config toml")?)
            .context("reparse config toml")?;
    let section_table = table
        .entry(section.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()))
        .as_table_mut()
        .ok_or_else(|| anyhow!("unknown config section '{section}'"))?;
    section_table.insert(field.to_string(), parse_scalar(raw));

    let updated: CloudopsConfig = toml::from_str(&toml::to_string(&table).context("serialize config toml")?)
        .with_context(|| format!("set {key}"))?;
    updated.validate().with_context(|| format!("set {key}"))?;
    Ok(updated)
}

fn parse_scalar(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("value"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}
