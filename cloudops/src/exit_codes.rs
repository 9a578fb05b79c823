//! Stable exit codes for cloudops CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Missing or invalid configuration, or any other error.
pub const INVALID: i32 = 1;
/// Classification confidence fell below the configured threshold.
pub const LOW_CONFIDENCE: i32 = 2;
/// A step requires approval and `--approve` was not given.
pub const APPROVAL_REQUIRED: i32 = 3;
/// Execution finished with status `failed` (no primitive succeeded).
pub const EXECUTION_FAILED: i32 = 4;
/// The investigation finished but its audit record could not be written.
pub const AUDIT_FAILED: i32 = 5;
