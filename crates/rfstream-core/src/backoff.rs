//! Wait policy for a side that finds its ring full or empty.
//!
//! The ring never waits. Callers that must make progress loop on
//! `reserve_*` and call [`Backoff::wait`] with a growing attempt counter
//! between tries, resetting the counter once they get a window.

use std::time::Duration;

/// How to wait between failed ring reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Busy-spin with a pause hint on every attempt.
    Spin,
    /// Spin for `spin_limit` attempts, then yield the time slice.
    SpinThenYield {
        /// Attempts that spin before yielding starts.
        spin_limit: u32,
    },
    /// Sleep for a fixed interval on every attempt.
    Sleep(Duration),
}

impl Default for Backoff {
    fn default() -> Self {
        Self::SpinThenYield { spin_limit: 64 }
    }
}

impl Backoff {
    /// Waits once. `attempt` counts consecutive failed reservations from 0.
    #[inline]
    pub fn wait(&self, attempt: u32) {
        match *self {
            Self::Spin => core::hint::spin_loop(),
            Self::SpinThenYield { spin_limit } => {
                if attempt < spin_limit {
                    core::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
            Self::Sleep(interval) => std::thread::sleep(interval),
        }
    }

    /// Retries `op` until it returns `Some`, waiting between attempts.
    pub fn retry<T>(&self, mut op: impl FnMut() -> Option<T>) -> T {
        let mut attempt = 0u32;
        loop {
            if let Some(v) = op() {
                return v;
            }
            self.wait(attempt);
            attempt = attempt.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spins_then_yields() {
        assert_eq!(Backoff::default(), Backoff::SpinThenYield { spin_limit: 64 });
    }

    #[test]
    fn retry_returns_first_success() {
        let mut calls = 0;
        let v = Backoff::Spin.retry(|| {
            calls += 1;
            (calls == 5).then_some(calls * 10)
        });
        assert_eq!(v, 50);
        assert_eq!(calls, 5);
    }

    #[test]
    fn sleep_waits_at_least_interval() {
        let start = std::time::Instant::now();
        Backoff::Sleep(Duration::from_millis(2)).wait(0);
        assert!(start.elapsed() >= Duration::from_millis(2));
    }
}
