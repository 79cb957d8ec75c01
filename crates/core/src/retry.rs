//! Retry policy and attempt counting
//!
//! Sessions retry with a constant delay between attempts and give up for
//! good once the attempt cap is reached.

use std::time::Duration;

/// Retry policy for failed sessions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryPolicy {
    /// No automatic retries
    None,

    /// Fixed number of retry attempts with constant delay
    Fixed {
        /// Number of retry attempts
        attempts: u32,
        /// Delay between retries
        delay: Duration,
    },
}

impl RetryPolicy {
    /// Create a fixed retry policy
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { attempts, delay }
    }

    /// Delay before retry number `attempt` (1-indexed), `None` once exhausted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { attempts, delay } => {
                if attempt < *attempts {
                    Some(*delay)
                } else {
                    None
                }
            }
        }
    }

    /// Whether `attempt` retries use up the policy
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.delay_for_attempt(attempt).is_none()
    }

    /// Get maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { attempts, .. } => *attempts,
        }
    }
}

impl Default for RetryPolicy {
    /// 30 attempts, 3 seconds apart
    fn default() -> Self {
        RetryPolicy::Fixed {
            attempts: 30,
            delay: Duration::from_secs(3),
        }
    }
}

/// Per-session retry counter
///
/// Only moves up, except for the two sanctioned resets (confirmed playback
/// and manual retry), which live in the session module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounter(u32);

impl RetryCounter {
    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn increment(&mut self) -> u32 {
        self.0 = self.0.saturating_add(1);
        self.0
    }

    pub(crate) fn reset(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100));

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(3), None);
        assert!(policy.is_exhausted(3));
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::None;
        assert!(policy.is_exhausted(0));
        assert_eq!(policy.max_attempts(), 0);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 30);
        assert_eq!(policy.delay_for_attempt(29), Some(Duration::from_secs(3)));
        assert!(policy.is_exhausted(30));
    }

    #[test]
    fn test_counter() {
        let mut counter = RetryCounter::default();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }
}
