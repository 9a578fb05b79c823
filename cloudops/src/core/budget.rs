//! Time budget helpers for collaborator calls.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Remaining time until `deadline`, or an error once it has passed.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        return Err(anyhow!("deadline exceeded"));
    }
    Ok(remaining)
}

/// Clamp a per-call timeout to whatever is left of an outer deadline.
pub fn bounded_timeout(timeout: Duration, deadline: Option<Instant>) -> Result<Duration> {
    match deadline {
        Some(deadline) => Ok(timeout.min(remaining_budget(deadline)?)),
        None => Ok(timeout),
    }
}

/// Milliseconds elapsed since `start`, saturating.
pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
