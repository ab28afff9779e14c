// src/ingest/backoff.rs
//! Ingestion-loop backoff: consecutive-error counter + delay multiplier.
//!
//! - success → counter 0, multiplier 1×
//! - rate limited → multiplier doubles, capped at 4×
//! - throttled → multiplier doubles, capped at 8×
//! - generic → from the second consecutive failure on, ×1.5, capped at 6×

use std::time::Duration;

use crate::ingest::client::FailureClass;

const RATE_LIMIT_CAP: f64 = 4.0;
const THROTTLE_CAP: f64 = 8.0;
const GENERIC_CAP: f64 = 6.0;
/// Consecutive failures before a degradation message is shown.
const STATUS_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
pub struct IngestBackoff {
    consecutive_errors: u32,
    multiplier: f64,
    last_class: Option<FailureClass>,
}

impl Default for IngestBackoff {
    fn default() -> Self {
        Self {
            consecutive_errors: 0,
            multiplier: 1.0,
            last_class: None,
        }
    }
}

impl IngestBackoff {
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.multiplier = 1.0;
        self.last_class = None;
    }

    pub fn record_failure(&mut self, class: FailureClass) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_class = Some(class);
        self.multiplier = match class {
            FailureClass::RateLimited => (self.multiplier * 2.0).min(RATE_LIMIT_CAP),
            FailureClass::Throttled => (self.multiplier * 2.0).min(THROTTLE_CAP),
            FailureClass::Generic if self.consecutive_errors >= 2 => {
                (self.multiplier * 1.5).min(GENERIC_CAP)
            }
            FailureClass::Generic => self.multiplier,
        };
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// `base × multiplier`.
    pub fn next_delay(&self, base: Duration) -> Duration {
        base.mul_f64(self.multiplier)
    }

    /// Human-readable degradation note, only after sustained failures.
    pub fn status_message(&self) -> Option<&'static str> {
        if self.consecutive_errors < STATUS_AFTER_FAILURES {
            return None;
        }
        Some(match self.last_class? {
            FailureClass::RateLimited => "temporarily slowing down due to rate limits",
            FailureClass::Throttled => "upstream is throttling requests; backing off",
            FailureClass::Generic => "having trouble reaching the feed; retrying less often",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_caps_at_four() {
        let mut b = IngestBackoff::default();
        for _ in 0..10 {
            b.record_failure(FailureClass::RateLimited);
        }
        assert_eq!(b.multiplier(), 4.0);
        assert_eq!(b.next_delay(Duration::from_secs(30)), Duration::from_secs(120));
    }

    #[test]
    fn throttle_caps_at_eight_and_generic_at_six() {
        let mut b = IngestBackoff::default();
        for _ in 0..10 {
            b.record_failure(FailureClass::Throttled);
        }
        assert_eq!(b.multiplier(), 8.0);

        let mut g = IngestBackoff::default();
        g.record_failure(FailureClass::Generic);
        assert_eq!(g.multiplier(), 1.0);
        for _ in 0..20 {
            g.record_failure(FailureClass::Generic);
        }
        assert_eq!(g.multiplier(), 6.0);
    }

    #[test]
    fn success_resets() {
        let mut b = IngestBackoff::default();
        b.record_failure(FailureClass::Throttled);
        b.record_failure(FailureClass::Throttled);
        b.record_success();
        assert_eq!(b.consecutive_errors(), 0);
        assert_eq!(b.multiplier(), 1.0);
    }

    #[test]
    fn status_only_after_sustained_failures() {
        let mut b = IngestBackoff::default();
        b.record_failure(FailureClass::RateLimited);
        b.record_failure(FailureClass::RateLimited);
        assert!(b.status_message().is_none());
        b.record_failure(FailureClass::RateLimited);
        assert_eq!(
            b.status_message(),
            Some("temporarily slowing down due to rate limits")
        );
    }
}
