//! Time source and warning rate limiting
//!
//! The manager reads time through the [`Clock`] trait so cool-downs and
//! rate limits can be driven by hand in tests. [`RateLimit`] is a burst
//! limiter over a fixed window: at most `burst` events pass per `interval`,
//! the rest are counted as suppressed.

use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

// ============================================================================
// Clock
// ============================================================================

/// Monotonic millisecond clock
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Move time forward
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    /// Jump to an absolute time
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Rate Limit
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct RateState {
    /// Start of the current window; `None` before the first event
    begin: Option<u64>,
    printed: u32,
    missed: u32,
}

/// Burst limiter for log output on hot paths
#[derive(Debug)]
pub struct RateLimit {
    interval_ms: u64,
    burst: u32,
    state: Mutex<RateState>,
}

/// Verdict of [`RateLimit::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateVerdict {
    /// Event may be reported; `suppressed` events were dropped since the
    /// previous window closed
    Allow { suppressed: u32 },
    /// Event must be dropped
    Deny,
}

impl RateLimit {
    pub const fn new(interval_ms: u64, burst: u32) -> Self {
        Self {
            interval_ms,
            burst,
            state: Mutex::new(RateState {
                begin: None,
                printed: 0,
                missed: 0,
            }),
        }
    }

    /// Account for one event at `now_ms`
    pub fn check(&self, now_ms: u64) -> RateVerdict {
        // A zero interval disables limiting
        if self.interval_ms == 0 {
            return RateVerdict::Allow { suppressed: 0 };
        }

        // Never spin on the fault path; contention counts as a drop.
        let Some(mut state) = self.state.try_lock() else {
            return RateVerdict::Deny;
        };

        let mut suppressed = 0;
        match state.begin {
            Some(begin) if now_ms.saturating_sub(begin) < self.interval_ms => {}
            _ => {
                suppressed = state.missed;
                *state = RateState {
                    begin: Some(now_ms),
                    printed: 0,
                    missed: 0,
                };
            }
        }

        if state.printed < self.burst {
            state.printed += 1;
            RateVerdict::Allow { suppressed }
        } else {
            state.missed += 1;
            RateVerdict::Deny
        }
    }

    /// Whether an event at `now_ms` may be reported
    pub fn allow(&self, now_ms: u64) -> bool {
        matches!(self.check(now_ms), RateVerdict::Allow { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_ms(), 100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_burst_then_deny() {
        let limit = RateLimit::new(5000, 2);
        assert!(limit.allow(0));
        assert!(limit.allow(10));
        assert!(!limit.allow(20));
        assert!(!limit.allow(4999));
    }

    #[test]
    fn test_window_reset_reports_suppressed() {
        let limit = RateLimit::new(1000, 1);
        assert_eq!(limit.check(0), RateVerdict::Allow { suppressed: 0 });
        assert_eq!(limit.check(1), RateVerdict::Deny);
        assert_eq!(limit.check(2), RateVerdict::Deny);
        assert_eq!(limit.check(1000), RateVerdict::Allow { suppressed: 2 });
    }

    #[test]
    fn test_zero_interval_never_limits() {
        let limit = RateLimit::new(0, 0);
        for t in 0..100 {
            assert!(limit.allow(t));
        }
    }
}
