//! Reconnection backoff
//!
//! Linear backoff: attempt `n` (1-indexed) waits `n * base_delay`. The
//! attempt counter resets on every successful handshake.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Attempt bookkeeping for one connection
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    attempts_used: u32,
    base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            attempts_used: 0,
            base_delay,
        }
    }

    /// Consume one attempt and return how long to wait before it
    ///
    /// `None` when reconnection is disabled or the attempts are spent.
    pub fn next_delay(&mut self, enabled: bool) -> Option<Duration> {
        if !enabled || self.attempts_used >= self.max_attempts {
            return None;
        }
        self.attempts_used += 1;
        Some(self.base_delay * self.attempts_used)
    }

    /// Reset after a successful connection
    #[inline]
    pub fn reset(&mut self) {
        self.attempts_used = 0;
    }

    #[inline(always)]
    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    #[inline(always)]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[inline(always)]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }
}

/// One-shot stop flag that interrupts backoff sleeps
#[derive(Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    /// Re-arm before a new `connect()`
    pub fn clear(&self) {
        *self.stopped.lock() = false;
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `delay` unless raised first; returns true if raised
    pub fn wait_timeout(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_linear_backoff_then_exhaustion() {
        let base = Duration::from_millis(100);
        let mut policy = ReconnectPolicy::new(3, base);

        assert_eq!(policy.next_delay(true), Some(base));
        assert_eq!(policy.next_delay(true), Some(base * 2));
        assert_eq!(policy.next_delay(true), Some(base * 3));
        assert_eq!(policy.next_delay(true), None);
        assert_eq!(policy.attempts_used(), 3);
    }

    #[test]
    fn test_reset_restores_attempts() {
        let mut policy = ReconnectPolicy::new(2, Duration::from_secs(1));
        policy.next_delay(true);
        policy.next_delay(true);
        assert_eq!(policy.next_delay(true), None);

        policy.reset();
        assert_eq!(policy.attempts_used(), 0);
        assert_eq!(policy.next_delay(true), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_disabled_never_retries() {
        let mut policy = ReconnectPolicy::new(5, Duration::from_secs(1));
        assert_eq!(policy.next_delay(false), None);
        assert_eq!(policy.attempts_used(), 0);

        let mut zero = ReconnectPolicy::new(0, Duration::from_secs(1));
        assert_eq!(zero.next_delay(true), None);
    }

    #[test]
    fn test_stop_signal_interrupts_wait() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let start = Instant::now();
                let raised = signal.wait_timeout(Duration::from_secs(10));
                (raised, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        signal.raise();
        let (raised, elapsed) = waiter.join().unwrap();
        assert!(raised);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_signal_times_out() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));

        signal.raise();
        assert!(signal.is_raised());
        signal.clear();
        assert!(!signal.is_raised());
    }
}
