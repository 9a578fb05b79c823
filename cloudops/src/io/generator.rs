//! Text-generation collaborator.
//!
//! The pipeline treats the model as an opaque command: the prompt goes in on
//! stdin, the completion comes back on stdout. Sampling parameters travel as
//! environment variables so any wrapper script can forward them.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

pub trait TextGenerator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Runs a configured command once per request.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    model: Option<String>,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, model: Option<String>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            model,
            output_limit_bytes,
        }
    }

    fn build_command(&self, request: &GenerationRequest) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("llm command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("CLOUDOPS_TEMPERATURE", request.temperature.to_string())
            .env("CLOUDOPS_MAX_TOKENS", request.max_tokens.to_string());
        if let Some(model) = &self.model {
            cmd.env("CLOUDOPS_MODEL", model);
        }
        Ok(cmd)
    }
}

/// System text first, then the prompt, separated by a blank line.
pub fn render_stdin(request: &GenerationRequest) -> String {
    match &request.system {
        Some(system) => format!("{system}\n\n{}", request.prompt),
        None => request.prompt.clone(),
    }
}

impl TextGenerator for CommandGenerator {
    #[instrument(skip_all, fields(max_tokens = request.max_tokens, timeout_secs = request.timeout.as_secs()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let cmd = self.build_command(request)?;
        let stdin = render_stdin(request);
        let output = run_command_with_timeout(
            cmd,
            Some(stdin.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
        )?;
        output.require_success("llm command")?;
        let text = output.stdout_text();
        debug!(bytes = text.len(), "completion received");
        if text.trim().is_empty() {
            return Err(anyhow!("llm command produced no output"));
        }
        Ok(text)
    }
}
