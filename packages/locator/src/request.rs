//! Request tokens for discarding superseded results.
//!
//! Every resolution or click is issued a token from a shared counter.
//! A result may only be applied while its token is still the latest one
//! issued; anything older is dropped on completion.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic token source.
#[derive(Debug, Default)]
pub struct RequestTracker {
    latest: AtomicU64,
}

impl RequestTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            latest: AtomicU64::new(0),
        }
    }

    /// Issues a new token, superseding every earlier one.
    pub fn issue(&self) -> RequestToken {
        RequestToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether no request has been issued after `token`.
    #[must_use]
    pub fn is_current(&self, token: RequestToken) -> bool {
        self.latest.load(Ordering::SeqCst) == token.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_increase() {
        let tracker = RequestTracker::new();
        let first = tracker.issue();
        let second = tracker.issue();
        assert!(second > first);
        assert_eq!(first.to_string(), "#1");
    }

    #[test]
    fn only_latest_is_current() {
        let tracker = RequestTracker::new();
        let first = tracker.issue();
        assert!(tracker.is_current(first));

        let second = tracker.issue();
        assert!(!tracker.is_current(first));
        assert!(tracker.is_current(second));
    }
}
