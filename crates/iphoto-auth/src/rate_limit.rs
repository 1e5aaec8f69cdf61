//! Submission throttling for the 2FA web surface
//!
//! Two small limiters, both backed by plain mutexes (the server handles
//! one user on loopback; contention is not a concern):
//!
//! - [`SubmitLimiter`] - sliding window, at most 5 submissions per source
//!   per minute; excess answers 429
//! - [`RequestThrottle`] - at most one cloud resend per 30 seconds

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Window length for submission counting.
const SUBMIT_WINDOW: Duration = Duration::from_secs(60);

/// Maximum submissions per source within [`SUBMIT_WINDOW`].
const SUBMIT_LIMIT: usize = 5;

/// Minimum spacing between code resend requests.
const REQUEST_INTERVAL: Duration = Duration::from_secs(30);

/// Sliding-window limiter keyed by source address
#[derive(Debug, Default)]
pub struct SubmitLimiter {
    hits: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl SubmitLimiter {
    /// Creates an empty limiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an attempt from `source` and reports whether it is allowed.
    pub fn allow(&self, source: IpAddr) -> bool {
        self.allow_at(source, Instant::now())
    }

    /// Testable variant taking an explicit clock reading.
    pub fn allow_at(&self, source: IpAddr, now: Instant) -> bool {
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        let window = hits.entry(source).or_default();
        window.retain(|t| now.duration_since(*t) < SUBMIT_WINDOW);

        if window.len() >= SUBMIT_LIMIT {
            return false;
        }
        window.push(now);
        true
    }
}

/// Spacing throttle for `POST /request`
#[derive(Debug, Default)]
pub struct RequestThrottle {
    last: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    /// Creates a throttle with no prior request
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports whether a resend may go out now, recording it if so.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Testable variant taking an explicit clock reading.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if now.duration_since(prev) < REQUEST_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn test_first_five_submissions_allowed() {
        let limiter = SubmitLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow_at(ip(), now));
        }
    }

    #[test]
    fn test_sixth_submission_within_window_denied() {
        let limiter = SubmitLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow_at(ip(), now));
        }
        assert!(!limiter.allow_at(ip(), now));
        assert!(!limiter.allow_at(ip(), now + Duration::from_secs(59)));
    }

    #[test]
    fn test_window_expiry_readmits() {
        let limiter = SubmitLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow_at(ip(), now));
        }
        assert!(limiter.allow_at(ip(), now + Duration::from_secs(61)));
    }

    #[test]
    fn test_sources_are_independent() {
        let limiter = SubmitLimiter::new();
        let now = Instant::now();
        let other: IpAddr = "::1".parse().unwrap();
        for _ in 0..5 {
            assert!(limiter.allow_at(ip(), now));
        }
        assert!(limiter.allow_at(other, now));
    }

    #[test]
    fn test_request_throttle_spacing() {
        let throttle = RequestThrottle::new();
        let now = Instant::now();
        assert!(throttle.allow_at(now));
        assert!(!throttle.allow_at(now + Duration::from_secs(29)));
        assert!(throttle.allow_at(now + Duration::from_secs(31)));
    }
}
