// ── Reconnection policy and circuit breaker ──
//
// Pure state machine: no timers, no I/O. The session loop feeds it
// outcomes and instants, it answers whether and when to try again.

use std::time::Duration;

use tokio::time::Instant;

/// Exponential backoff plus circuit-breaker limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub base_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Reconnection attempts allowed before the breaker trips. Default: 5.
    pub max_attempts: u32,

    /// How long a tripped breaker refuses new attempts. Default: 5 min.
    pub cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// `delay = min(base * 2^(attempt-1), max)` for a 1-based `attempt`.
pub fn backoff_delay(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    policy
        .base_delay
        .saturating_mul(1_u32 << exponent)
        .min(policy.max_delay)
}

/// Whether the breaker lets a connection attempt through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The hub rejected our token; only an explicit reset re-opens.
    AuthFailed,
    /// Too many recent failures; wait out the cooldown.
    CoolingDown { remaining: Duration },
}

/// What to do after an unexpected closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    Retry { attempt: u32, delay: Duration },
    Tripped { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: ReconnectPolicy,
    attempts: u32,
    last_failure: Option<Instant>,
    auth_failed: bool,
}

impl CircuitBreaker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_failure: None,
            auth_failed: false,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn auth_failed(&self) -> bool {
        self.auth_failed
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Gate every connection attempt, scheduled or caller-triggered.
    pub fn admit(&self, now: Instant) -> Admission {
        if self.auth_failed {
            return Admission::AuthFailed;
        }
        if self.attempts >= self.policy.max_attempts {
            if let Some(at) = self.last_failure {
                let elapsed = now.saturating_duration_since(at);
                if elapsed < self.policy.cooldown {
                    return Admission::CoolingDown {
                        remaining: self.policy.cooldown - elapsed,
                    };
                }
            }
        }
        Admission::Allowed
    }

    /// Handshake reached `auth_ok`.
    pub fn record_success(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
    }

    /// Non-normal closure, transport error, or handshake timeout.
    pub fn record_failure(&mut self, now: Instant) -> FailureVerdict {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts <= self.policy.max_attempts {
            FailureVerdict::Retry {
                attempt: self.attempts,
                delay: backoff_delay(self.attempts, &self.policy),
            }
        } else {
            self.last_failure = Some(now);
            FailureVerdict::Tripped {
                attempts: self.attempts,
            }
        }
    }

    pub fn record_auth_rejected(&mut self) {
        self.auth_failed = true;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_failure = None;
        self.auth_failed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(breaker: &mut CircuitBreaker, now: Instant) {
        for _ in 0..breaker.policy().max_attempts {
            assert!(matches!(
                breaker.record_failure(now),
                FailureVerdict::Retry { .. }
            ));
        }
        assert_eq!(
            breaker.record_failure(now),
            FailureVerdict::Tripped { attempts: 6 }
        );
    }

    #[test]
    fn default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.cooldown, Duration::from_secs(300));
    }

    #[test]
    fn backoff_sequence_doubles_from_one_second() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=5)
            .map(|attempt| backoff_delay(attempt, &policy).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(backoff_delay(6, &policy), Duration::from_secs(30));
        assert_eq!(backoff_delay(40, &policy), Duration::from_secs(30));
    }

    #[test]
    fn failures_schedule_increasing_retries() {
        let mut breaker = CircuitBreaker::new(ReconnectPolicy::default());
        let now = Instant::now();
        assert_eq!(
            breaker.record_failure(now),
            FailureVerdict::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            breaker.record_failure(now),
            FailureVerdict::Retry {
                attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(breaker.admit(now), Admission::Allowed);
    }

    #[test]
    fn tripped_breaker_refuses_within_cooldown() {
        let mut breaker = CircuitBreaker::new(ReconnectPolicy::default());
        let t0 = Instant::now();
        trip(&mut breaker, t0);

        let later = t0 + Duration::from_secs(60);
        assert_eq!(
            breaker.admit(later),
            Admission::CoolingDown {
                remaining: Duration::from_secs(240)
            }
        );
    }

    #[test]
    fn tripped_breaker_allows_a_probe_after_cooldown() {
        let mut breaker = CircuitBreaker::new(ReconnectPolicy::default());
        let t0 = Instant::now();
        trip(&mut breaker, t0);

        let after = t0 + Duration::from_secs(301);
        assert_eq!(breaker.admit(after), Admission::Allowed);

        // A failed probe trips again immediately.
        assert!(matches!(
            breaker.record_failure(after),
            FailureVerdict::Tripped { .. }
        ));
        assert!(matches!(
            breaker.admit(after),
            Admission::CoolingDown { .. }
        ));
    }

    #[test]
    fn auth_rejection_blocks_until_reset() {
        let mut breaker = CircuitBreaker::new(ReconnectPolicy::default());
        breaker.record_auth_rejected();
        let far_future = Instant::now() + Duration::from_secs(86_400);
        assert_eq!(breaker.admit(far_future), Admission::AuthFailed);

        breaker.reset();
        assert_eq!(breaker.admit(far_future), Admission::Allowed);
    }

    #[test]
    fn reset_clears_attempts_and_cooldown() {
        let mut breaker = CircuitBreaker::new(ReconnectPolicy::default());
        let t0 = Instant::now();
        trip(&mut breaker, t0);

        breaker.reset();
        assert_eq!(breaker.attempts(), 0);
        assert!(breaker.last_failure().is_none());
        assert_eq!(breaker.admit(t0), Admission::Allowed);
    }

    #[test]
    fn success_resets_attempt_counter() {
        let mut breaker = CircuitBreaker::new(ReconnectPolicy::default());
        let now = Instant::now();
        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();
        assert_eq!(breaker.attempts(), 0);
        assert_eq!(
            breaker.record_failure(now),
            FailureVerdict::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }
}
