//! Cloud incident investigation CLI.
//!
//! Classifies a free-text incident query, runs a read-only diagnostic plan
//! against the configured collaborators, and prints findings kept apart from
//! hypotheses. Configuration and the audit log live under `$CLOUDOPS_HOME`
//! (default `~/.cloudops`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use cloudops::core::types::RunStatus;
use cloudops::error::InvestigationError;
use cloudops::exit_codes;
use cloudops::investigate::{InvestigationRequest, Investigator};
use cloudops::io::audit::{JsonlAuditLog, parse_window};
use cloudops::io::config::{
    CloudopsConfig, config_path, load_config, resolve_home, set_config_value, write_config,
};
use cloudops::logging;
use cloudops::report;

#[derive(Parser)]
#[command(
    name = "cloudops",
    version,
    about = "Investigate cloud incidents from a natural-language query"
)]
struct Cli {
    /// Directory holding config.toml and the audit log.
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config.toml and create the audit directory.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Classify the query, run the diagnostic plan and interpret the facts.
    Investigate {
        /// Incident description, e.g. "high cpu on prod cluster".
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Show the plan without executing it.
        #[arg(long)]
        dry_run: bool,
        /// Override the scope extracted from the query.
        #[arg(long)]
        scope: Option<String>,
        /// Approve every step that requires approval.
        #[arg(long)]
        approve: bool,
        /// Use the static playbook catalog instead of the strategy table.
        #[arg(long)]
        playbook: bool,
        /// Explain why the plan has the steps it has.
        #[arg(long)]
        explain: bool,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List audit records.
    Audit {
        /// Lookback window such as 24h or 7d.
        #[arg(long, default_value = "24h")]
        last: String,
        /// Only records for this user.
        #[arg(long)]
        user: Option<String>,
    },
    /// Set a config value by dotted key, e.g. `policy.confidence_threshold 0.7`.
    Config { key: String, value: String },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let home = resolve_home(cli.home.as_deref())?;
    match cli.command {
        Command::Init { force } => cmd_init(&home, force),
        Command::Investigate {
            query,
            dry_run,
            scope,
            approve,
            playbook,
            explain,
            json,
        } => {
            let request = InvestigationRequest {
                query: query.join(" "),
                scope,
                dry_run,
                approve,
                ..InvestigationRequest::default()
            };
            let output = Output { explain, json };
            cmd_investigate(&home, &request, playbook, output)
        }
        Command::Audit { last, user } => cmd_audit(&home, &last, user.as_deref()),
        Command::Config { key, value } => cmd_config(&home, &key, &value),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<InvestigationError>() {
        Some(InvestigationError::LowConfidence { .. }) => exit_codes::LOW_CONFIDENCE,
        Some(InvestigationError::Policy(_)) => exit_codes::APPROVAL_REQUIRED,
        _ => exit_codes::INVALID,
    }
}

fn status_exit_code(status: Option<RunStatus>, audit_error: Option<&str>) -> i32 {
    match (status, audit_error) {
        (Some(RunStatus::Failed), _) => exit_codes::EXECUTION_FAILED,
        (_, Some(_)) => exit_codes::AUDIT_FAILED,
        _ => exit_codes::OK,
    }
}

#[derive(Clone, Copy)]
struct Output {
    explain: bool,
    json: bool,
}

fn cmd_init(home: &Path, force: bool) -> Result<i32> {
    let path = config_path(home);
    if path.exists() && !force {
        println!("config already exists at {}", path.display());
        return Ok(exit_codes::OK);
    }
    let cfg = CloudopsConfig::default();
    write_config(&path, &cfg)?;
    let audit_dir = cfg.audit_dir(home);
    fs::create_dir_all(&audit_dir)
        .with_context(|| format!("create audit dir {}", audit_dir.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_investigate(
    home: &Path,
    request: &InvestigationRequest,
    playbook: bool,
    output: Output,
) -> Result<i32> {
    let cfg = load_config(&config_path(home))?;
    let investigator = Investigator::from_config(&cfg)?;
    let audit = JsonlAuditLog::new(cfg.audit_dir(home));

    if playbook {
        let report = investigator.investigate_playbook(request, &audit)?;
        if output.json {
            print!("{}", report::to_json(&report)?);
        } else {
            print!("{}", report::render_playbook(&report, output.explain));
        }
        return Ok(status_exit_code(report.status(), report.audit_error.as_deref()));
    }

    let report = investigator.investigate(request, &audit)?;
    if output.json {
        print!("{}", report::to_json(&report)?);
    } else {
        print!("{}", report::render_investigation(&report, output.explain));
    }
    Ok(status_exit_code(report.status(), report.audit_error.as_deref()))
}

fn cmd_audit(home: &Path, last: &str, user: Option<&str>) -> Result<i32> {
    let cfg = load_config(&config_path(home))?;
    let window = parse_window(last)?;
    let log = JsonlAuditLog::new(cfg.audit_dir(home));
    let records = log.read_entries(Utc::now() - window, user)?;
    print!("{}", report::render_audit(&records));
    Ok(exit_codes::OK)
}

fn cmd_config(home: &Path, key: &str, value: &str) -> Result<i32> {
    let path = config_path(home);
    let cfg = load_config(&path)?;
    let updated = set_config_value(&cfg, key, value)?;
    write_config(&path, &updated)?;
    println!("set {key} = {value}");
    Ok(exit_codes::OK)
}
