//! Shared time budget helpers for run deadlines.

use std::time::{Duration, Instant};

/// The overall run deadline passed before the run could finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run deadline exceeded")]
pub struct RunDeadlineExceeded;

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration, RunDeadlineExceeded> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(RunDeadlineExceeded);
    }
    Ok(remaining)
}

/// Cap a per-call timeout by the remaining run budget.
pub fn call_timeout(per_call: Duration, deadline: Instant) -> Result<Duration, RunDeadlineExceeded> {
    Ok(per_call.min(remaining_budget(deadline)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_deadline_is_an_error() {
        let past = Instant::now() - Duration::from_millis(1);
        assert_eq!(remaining_budget(past), Err(RunDeadlineExceeded));
    }

    #[test]
    fn call_timeout_is_capped_by_deadline() {
        let deadline = Instant::now() + Duration::from_secs(5);
        let timeout = call_timeout(Duration::from_secs(60), deadline).expect("budget");
        assert!(timeout <= Duration::from_secs(5));
        let timeout = call_timeout(Duration::from_secs(1), deadline).expect("budget");
        assert_eq!(timeout, Duration::from_secs(1));
    }
}
