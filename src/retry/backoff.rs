//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Upper bound of the jitter fraction added to each delay.
const MAX_JITTER: f64 = 0.1;

/// Maps a zero-indexed retry attempt to a delay.
///
/// `delay(n) = min(base * multiplier^n + jitter, max)` where jitter is up to
/// 10% of the exponential term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
  pub base_delay: Duration,
  pub max_delay: Duration,
  pub multiplier: f64,
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    Self {
      base_delay: Duration::from_millis(1_000),
      max_delay: Duration::from_millis(30_000),
      multiplier: 2.0,
    }
  }
}

impl BackoffPolicy {
  pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
    Self {
      base_delay,
      max_delay,
      multiplier,
    }
  }

  /// Delay before the retry following `attempt`, with random jitter.
  pub fn delay(&self, attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..MAX_JITTER);
    self.delay_with_jitter(attempt, jitter)
  }

  /// Delay with a given jitter fraction, clamped to `0..=0.1`.
  pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let exponential = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
    let jittered = exponential + jitter.clamp(0.0, MAX_JITTER) * exponential;
    let capped = jittered.min(self.max_delay.as_secs_f64());

    // Non-finite growth saturates at the ceiling
    Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000), 2.0)
  }

  #[test]
  fn test_exponential_growth_without_jitter() {
    let p = policy();
    assert_eq!(p.delay_with_jitter(0, 0.0), Duration::from_millis(100));
    assert_eq!(p.delay_with_jitter(1, 0.0), Duration::from_millis(200));
    assert_eq!(p.delay_with_jitter(2, 0.0), Duration::from_millis(400));
  }

  #[test]
  fn test_caps_at_max_delay() {
    let p = policy();
    assert_eq!(p.delay_with_jitter(4, 0.0), Duration::from_millis(1_000));
    assert_eq!(p.delay_with_jitter(500, 0.1), Duration::from_millis(1_000));
    assert_eq!(p.delay(u32::MAX), Duration::from_millis(1_000));
  }

  #[test]
  fn test_jitter_bounded_to_ten_percent() {
    let p = policy();
    for _ in 0..100 {
      let d = p.delay(1);
      assert!(d >= Duration::from_millis(200));
      assert!(d <= Duration::from_millis(220));
    }
    assert_eq!(p.delay_with_jitter(0, 5.0), Duration::from_millis(110));
  }

  #[test]
  fn test_monotonic_until_saturation() {
    let p = policy();
    // Worst case: max jitter at n, no jitter at n + 1
    for n in 0..10 {
      assert!(p.delay_with_jitter(n + 1, 0.0) >= p.delay_with_jitter(n, MAX_JITTER));
    }
    for n in 0..10 {
      assert!(p.delay(n + 1) >= p.delay(n));
    }
  }
}
