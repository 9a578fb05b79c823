//! CLI tests for `cloudops` commands.
//!
//! Spawns the binary against a temporary home and verifies exit codes for
//! missing config, low confidence, approval and successful runs.

use std::path::Path;
use std::process::{Command, Output};

use cloudops::core::types::RiskLevel;
use cloudops::exit_codes;
use cloudops::io::config::{CloudopsConfig, config_path, load_config, write_config};
use cloudops::test_support::offline_config;

const CLASSIFIED: &str = r#"{"primary_class": "resource_saturation", "confidence": 0.9, "resource_type": "eks", "metric": "cpu", "scope": "prod", "time_window": 3600}"#;
const VAGUE: &str = r#"{"primary_class": "resource_saturation", "confidence": 0.3}"#;
const INTERPRETED: &str = r#"{"key_findings": ["analyze_utilization shows rising cpu"], "likely_root_causes": [], "recommended_actions": [], "confidence": 0.6, "requires_human_review": true}"#;

fn cloudops(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cloudops"))
        .arg("--home")
        .arg(home)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run cloudops")
}

/// Generator script answering classification calls (500 max tokens) with
/// `classification` and everything else with `interpretation`.
fn scripted_llm(classification: &str, interpretation: &str) -> Vec<String> {
    let script = format!(
        "cat >/dev/null; if [ \"$CLOUDOPS_MAX_TOKENS\" = 500 ]; then printf '%s' '{classification}'; \
         else printf '%s' '{interpretation}'; fi"
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}

fn home_with(config: impl FnOnce(&Path) -> CloudopsConfig) -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path());
    write_config(&config_path(temp.path()), &cfg).expect("write config");
    temp
}

#[test]
fn missing_config_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cloudops(temp.path(), &["investigate", "high", "cpu"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cloudops init"));
}

#[test]
fn init_then_config_updates_the_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cloudops(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("audit").is_dir());

    let output = cloudops(temp.path(), &["config", "policy.confidence_threshold", "0.7"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&config_path(temp.path())).expect("load");
    assert!((cfg.policy.confidence_threshold - 0.7).abs() < 1e-9);

    let output = cloudops(temp.path(), &["config", "policy.confidence_threshold", "3"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let output = cloudops(temp.path(), &["config", "nonsense", "1"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_keeps_existing_config_without_force() {
    let temp = home_with(|home| {
        let mut cfg = offline_config(home, vec!["llm".to_string()]);
        cfg.llm.model = Some("custom".to_string());
        cfg
    });
    let output = cloudops(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&config_path(temp.path())).expect("load");
    assert_eq!(cfg.llm.model.as_deref(), Some("custom"));

    cloudops(temp.path(), &["init", "--force"]);
    let cfg = load_config(&config_path(temp.path())).expect("load");
    assert_eq!(cfg.llm.model, None);
}

#[cfg(unix)]
#[test]
fn investigate_runs_offline_and_is_audited() {
    let temp = home_with(|home| offline_config(home, scripted_llm(CLASSIFIED, INTERPRETED)));

    let output = cloudops(temp.path(), &["investigate", "high", "cpu", "on", "prod", "cluster"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("Incident: resource_saturation"));
    assert!(stdout.contains("Key findings (observed):"));

    let output = cloudops(temp.path(), &["audit", "--last", "1h"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("high cpu on prod cluster"));
}

#[cfg(unix)]
#[test]
fn dry_run_json_has_plan_and_no_execution() {
    let temp = home_with(|home| offline_config(home, scripted_llm(CLASSIFIED, INTERPRETED)));

    let output = cloudops(temp.path(), &["investigate", "high cpu", "--dry-run", "--json"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["plan"]["steps"][0]["primitive"], "analyze_utilization");
    assert!(report["execution"].is_null());
    assert!(!temp.path().join("audit").exists());
}

#[cfg(unix)]
#[test]
fn low_confidence_exits_with_its_code() {
    let temp = home_with(|home| offline_config(home, scripted_llm(VAGUE, INTERPRETED)));
    let output = cloudops(temp.path(), &["investigate", "something", "odd"]);
    assert_eq!(output.status.code(), Some(exit_codes::LOW_CONFIDENCE));
    assert!(String::from_utf8_lossy(&output.stderr).contains("below threshold"));
}

#[cfg(unix)]
#[test]
fn unapproved_steps_exit_with_approval_code() {
    let temp = home_with(|home| {
        let mut cfg = offline_config(home, scripted_llm(CLASSIFIED, INTERPRETED));
        cfg.policy.require_approval_for = vec![RiskLevel::Read.as_str().to_string()];
        cfg
    });

    let output = cloudops(temp.path(), &["investigate", "high", "cpu"]);
    assert_eq!(output.status.code(), Some(exit_codes::APPROVAL_REQUIRED));

    let output = cloudops(temp.path(), &["investigate", "high", "cpu", "--approve"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[cfg(unix)]
#[test]
fn playbook_mode_uses_static_catalog() {
    let temp = home_with(|home| offline_config(home, scripted_llm(CLASSIFIED, INTERPRETED)));
    let output = cloudops(temp.path(), &["investigate", "high", "cpu", "--playbook"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("investigate_k8s_high_cpu"));
}

#[cfg(unix)]
#[test]
fn explain_prints_the_plan_summary() {
    let temp = home_with(|home| offline_config(home, scripted_llm(CLASSIFIED, INTERPRETED)));

    let output = cloudops(temp.path(), &["investigate", "high", "cpu", "--dry-run", "--explain"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Explanation:\nResource exhaustion investigation in scope"));

    let output = cloudops(temp.path(), &["investigate", "high", "cpu", "--dry-run"]);
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Explanation:"));

    let output = cloudops(
        temp.path(),
        &["investigate", "high", "cpu", "--playbook", "--dry-run", "--explain"],
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("identify top consumers"));
}

#[cfg(unix)]
#[test]
fn unwritable_audit_log_still_prints_the_report() {
    let temp = home_with(|home| {
        let blocked = home.join("not-a-dir");
        std::fs::write(&blocked, "").expect("write blocker");
        let mut cfg = offline_config(home, scripted_llm(CLASSIFIED, INTERPRETED));
        cfg.audit.dir = Some(blocked);
        cfg
    });

    let output = cloudops(temp.path(), &["investigate", "high", "cpu"]);
    assert_eq!(output.status.code(), Some(exit_codes::AUDIT_FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Key findings (observed):"));
    assert!(stdout.contains("Warning: audit record not written"));
}
