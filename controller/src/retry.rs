use std::{fmt::Display, thread, time::Duration};

/// Bounded retry loop with a fixed pause between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 5;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);

    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Runs `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the attempts run out. `op` receives the 1-based attempt
    /// number. The last error is returned.
    ///
    /// # Errors
    pub fn run<T, E, F, R>(&self, mut op: F, is_retryable: R) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    tracing::debug!("attempt {attempt}/{attempts} failed: {e}");
                }
                Err(e) => return Err(e),
            }

            attempt += 1;

            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ATTEMPTS, Self::DEFAULT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::RetryPolicy;
    use crate::DeviceError;

    const FAST: RetryPolicy = RetryPolicy::new(5, Duration::ZERO);

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_millis(200));
    }

    #[test]
    fn test_stops_on_success() {
        let mut calls = Vec::new();

        let result = FAST.run(
            |attempt| {
                calls.push(attempt);
                if attempt < 3 {
                    Err(DeviceError::Io("busy".to_owned()))
                } else {
                    Ok(attempt)
                }
            },
            DeviceError::is_retryable,
        );

        assert_eq!(result, Ok(3));
        assert_eq!(calls, [1, 2, 3]);
    }

    #[test]
    fn test_gives_up_after_all_attempts() {
        let mut calls = 0;

        let result: Result<(), _> = FAST.run(
            |attempt| {
                calls += 1;
                Err(DeviceError::Io(format!("failure {attempt}")))
            },
            DeviceError::is_retryable,
        );

        assert_eq!(result, Err(DeviceError::Io("failure 5".to_owned())));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_waits_between_attempts() {
        let delay = Duration::from_millis(20);
        let policy = RetryPolicy::new(5, delay);
        let mut calls = Vec::new();

        let started = Instant::now();
        let result: Result<(), _> = policy.run(
            |_| {
                calls.push(Instant::now());
                Err(DeviceError::Io("busy".to_owned()))
            },
            DeviceError::is_retryable,
        );

        assert!(result.is_err());
        assert_eq!(calls.len(), 5);
        assert!(started.elapsed() >= delay * 4);
        assert!(calls.windows(2).all(|pair| pair[1] - pair[0] >= delay));
    }

    #[test]
    fn test_fatal_error_is_not_retried() {
        let mut calls = 0;

        let result: Result<(), _> = FAST.run(
            |_| {
                calls += 1;
                Err(DeviceError::NotFound)
            },
            DeviceError::is_retryable,
        );

        assert_eq!(result, Err(DeviceError::NotFound));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let mut calls = 0;

        let result: Result<(), _> = policy.run(
            |_| {
                calls += 1;
                Err(DeviceError::Io("busy".to_owned()))
            },
            DeviceError::is_retryable,
        );

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
