//! Authentication attempt limiting
//!
//! NIST 800-53: AC-7 (Unsuccessful Logon Attempts)
//! STIG: V-222578
//! Implementation: Tracks failed logins per client address inside a
//! sliding window and locks the address out once the limit is hit.
//! Consulted before any credential check, cleared on success.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Limiter configuration
#[derive(Debug, Clone)]
pub struct AuthLimiterConfig {
    /// Failures tolerated inside one window before lockout
    pub max_failures: u32,
    /// Window length
    pub window: Duration,
    /// How long a locked-out address stays locked
    pub lockout: Duration,
}

impl Default for AuthLimiterConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window: Duration::from_secs(300),
            lockout: Duration::from_secs(900),
        }
    }
}

#[derive(Debug)]
struct FailureWindow {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

/// Per-address brute-force guard
pub struct AuthLimiter {
    config: AuthLimiterConfig,
    windows: Mutex<HashMap<IpAddr, FailureWindow>>,
}

impl AuthLimiter {
    pub fn new(config: AuthLimiterConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an address may attempt authentication right now
    ///
    /// NIST 800-53: AC-7 (Unsuccessful Logon Attempts)
    pub fn check_allowed(&self, addr: IpAddr) -> bool {
        let mut windows = self.windows.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        let Some(window) = windows.get_mut(&addr) else {
            return true;
        };

        if let Some(locked_until) = window.locked_until {
            if now < locked_until {
                warn!(
                    event = "auth_attempt_locked_out",
                    addr = %addr,
                    "Rejecting authentication from locked-out address"
                );
                return false;
            }
            window.locked_until = None;
            window.failures = 0;
            window.window_start = now;
        }

        if now.duration_since(window.window_start) > self.config.window {
            window.failures = 0;
            window.window_start = now;
        }
        window.failures < self.config.max_failures
    }

    /// Record a failed login attempt from an address
    pub fn record_failure(&self, addr: IpAddr) {
        let mut windows = self.windows.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        let window = windows.entry(addr).or_insert(FailureWindow {
            failures: 0,
            window_start: now,
            locked_until: None,
        });
        window.failures += 1;
        if window.failures >= self.config.max_failures {
            window.locked_until = Some(now + self.config.lockout);
            warn!(
                event = "auth_lockout",
                addr = %addr,
                failures = window.failures,
                lockout_secs = self.config.lockout.as_secs(),
                "Address locked out after repeated failures"
            );
        }
    }

    /// Clear the failure state of an address after a successful login
    pub fn record_success(&self, addr: IpAddr) {
        let mut windows = self.windows.lock().expect("limiter lock poisoned");
        if windows.remove(&addr).is_some() {
            debug!(event = "auth_failures_cleared", addr = %addr, "Failure window cleared");
        }
    }

    /// Drop windows that expired without reaching lockout
    pub fn cleanup(&self) {
        let mut windows = self.windows.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        windows.retain(|_, window| {
            if let Some(locked_until) = window.locked_until {
                return now < locked_until;
            }
            now.duration_since(window.window_start) <= self.config.window
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn limiter(max_failures: u32) -> AuthLimiter {
        AuthLimiter::new(AuthLimiterConfig {
            max_failures,
            window: Duration::from_secs(60),
            lockout: Duration::from_secs(120),
        })
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, last))
    }

    #[test]
    fn test_allows_first_attempts() {
        let limiter = limiter(3);
        assert!(limiter.check_allowed(addr(1)));
        limiter.record_failure(addr(1));
        assert!(limiter.check_allowed(addr(1)));
    }

    #[test]
    fn test_locks_out_after_limit() {
        let limiter = limiter(3);
        for _ in 0..3 {
            limiter.record_failure(addr(1));
        }
        assert!(!limiter.check_allowed(addr(1)));
        // Other addresses are unaffected
        assert!(limiter.check_allowed(addr(2)));
    }

    #[test]
    fn test_success_clears_failures() {
        let limiter = limiter(3);
        limiter.record_failure(addr(1));
        limiter.record_failure(addr(1));
        limiter.record_success(addr(1));
        limiter.record_failure(addr(1));
        assert!(limiter.check_allowed(addr(1)));
    }

    #[test]
    fn test_cleanup_keeps_locked_addresses() {
        let limiter = limiter(1);
        limiter.record_failure(addr(1));
        limiter.cleanup();
        assert!(!limiter.check_allowed(addr(1)));
    }
}
