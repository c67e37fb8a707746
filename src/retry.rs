//! In-slice retry policy for transient step failures.

use std::time::Duration;

/// How often, and after what pause, a transient failure is retried before the
/// slice gives up and leaves the page for the next tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Give up on the first transient error.
    #[default]
    None,

    Fixed {
        max_attempts: u32,
        delay: Duration,
    },

    /// Delay doubles from `initial_delay` on each attempt, capped at `max_delay`.
    Exponential {
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
    },
}

impl RetryPolicy {
    /// Exponential backoff starting at 500ms and capped at 8s.
    ///
    /// Slices are short, so the cap stays far below the usual time budget.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::Exponential {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed { max_attempts, delay }
    }

    /// Delay before retry number `attempt` (1-indexed), or `None` once the
    /// attempts are used up.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed { max_attempts, delay } => (attempt <= *max_attempts).then_some(*delay),
            Self::Exponential {
                max_attempts,
                initial_delay,
                max_delay,
            } => {
                if attempt > *max_attempts {
                    return None;
                }
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                Some(initial_delay.saturating_mul(factor).min(*max_delay))
            }
        }
    }

    /// Like [`delay_for_attempt`](Self::delay_for_attempt), but also `None`
    /// when sleeping would run past the `remaining` slice budget.
    pub fn delay_within(&self, attempt: u32, remaining: Duration) -> Option<Duration> {
        self.delay_for_attempt(attempt)
            .filter(|delay| *delay < remaining)
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_retries() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.delay_for_attempt(1), None);
        assert_eq!(policy.max_attempts(), 0);
    }

    #[test]
    fn fixed_stops_after_max_attempts() {
        let policy = RetryPolicy::fixed(2, Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn exponential_doubles_up_to_the_cap() {
        let policy = RetryPolicy::exponential(6);
        let delays: Vec<_> = (1..=7).map(|n| policy.delay_for_attempt(n)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(500)),
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(8)),
                Some(Duration::from_secs(8)),
                None,
            ]
        );
    }

    #[test]
    fn retries_that_would_overrun_the_budget_are_skipped() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        assert_eq!(
            policy.delay_within(1, Duration::from_secs(6)),
            Some(Duration::from_secs(5))
        );
        assert_eq!(policy.delay_within(1, Duration::from_secs(5)), None);
    }
}
