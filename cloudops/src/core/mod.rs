//! Pure logic (no I/O).

pub mod budget;
pub mod classifier;
pub mod composer;
pub mod context;
pub mod invariants;
pub mod outcome;
pub mod playbook;
pub mod policy;
pub mod strategy;
pub mod types;
