//! Side-effecting collaborators for the investigation pipeline.

pub mod audit;
pub mod aws;
pub mod cloud;
pub mod config;
pub mod fixtures;
pub mod generator;
pub mod orchestrator;
pub mod process;
pub mod prompt;
