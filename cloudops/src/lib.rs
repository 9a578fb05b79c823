//! Cloud incident investigation pipeline.
//!
//! A free-text incident query is classified, mapped to an ordered plan of
//! read-only diagnostic primitives, executed with per-primitive failure
//! isolation, and interpreted into findings, hypotheses and actions. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification validation,
//!   strategy table, plan composition, policy gate, aggregation). No I/O.
//! - **[`io`]**: Side-effecting collaborators (subprocesses, cloud and
//!   orchestrator clients, text generation, config, audit log).
//! - **[`agents`]**: The two reasoning call sites, classifier and interpreter.
//! - **[`primitives`]**: The diagnostic operations and their registry.
//!
//! Orchestration modules ([`executor`], [`investigate`], [`playbook`]) combine
//! core logic with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod error;
pub mod executor;
pub mod exit_codes;
pub mod investigate;
pub mod io;
pub mod logging;
pub mod playbook;
pub mod primitives;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
