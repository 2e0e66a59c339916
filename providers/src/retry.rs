//! Exponential backoff wrapper around provider calls, per §4.C: "The core
//! retries retryable errors with exponential backoff up to a fixed cap;
//! non-retryable aborts the enclosing ingest unit."

use std::thread::sleep;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 4, base_delay: Duration::from_millis(50), max_delay: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.max_delay)
    }
}

/// Runs `op`, retrying while `is_retryable(&err)` holds, up to
/// `policy.max_attempts` attempts total. Sleeps are skipped on the final
/// attempt. Non-retryable errors return immediately.
pub fn with_retry<T, E>(
    policy: RetryPolicy,
    mut op: impl FnMut() -> Result<T, E>,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                sleep(policy.delay_for(attempt));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_until_success_within_cap() {
        let calls = Cell::new(0);
        let policy = RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(4) };
        let result: Result<u32, &'static str> = with_retry(
            policy,
            || {
                let n = calls.get() + 1;
                calls.set(n);
                if n < 3 { Err("transient") } else { Ok(n) }
            },
            |_| true,
        );
        assert_eq!(result, Ok(3));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_retryable_aborts_immediately() {
        let calls = Cell::new(0);
        let result: Result<u32, &'static str> = with_retry(
            RetryPolicy::default(),
            || {
                calls.set(calls.get() + 1);
                Err("fatal")
            },
            |_| false,
        );
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.get(), 1);
    }
}
