//! Token bucket used to throttle one relay direction.

use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Token bucket holding at most one second worth of bytes.
///
/// Consumption may drive the balance negative; the caller then sleeps until the
/// debt is repaid, so the long-run rate never exceeds `rate` bytes per second
/// while bursts up to `capacity` pass untouched.
pub struct BandwidthLimiter {
  rate: f64,
  capacity: f64,
  tokens: f64,
  last_refill: Instant,
}

impl BandwidthLimiter {
  /// Returns `None` for a zero rate, meaning unthrottled.
  pub fn per_second(rate_bps: u64) -> Option<Self> {
    if rate_bps == 0 {
      return None;
    }
    let rate = rate_bps as f64;
    Some(Self {
      rate,
      capacity: rate,
      tokens: rate,
      last_refill: Instant::now(),
    })
  }

  /// Largest single chunk worth reading at once.
  pub fn burst(&self) -> usize {
    (self.capacity as usize).max(1)
  }

  #[cfg(test)]
  pub fn available(&mut self) -> f64 {
    self.refill();
    self.tokens
  }

  /// Accounts for `bytes` already read, sleeping if the bucket went into debt.
  pub async fn throttle(&mut self, bytes: usize) {
    self.refill();
    self.tokens -= bytes as f64;

    if self.tokens < 0.0 {
      let wait = Duration::from_secs_f64(-self.tokens / self.rate);
      trace!("bandwidth limiter sleeping {:?} for {} bytes", wait, bytes);
      sleep(wait).await;
    }
  }

  fn refill(&mut self) {
    let now = Instant::now();
    let elapsed = now.duration_since(self.last_refill).as_secs_f64();
    self.last_refill = now;
    self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_rate_is_unthrottled() {
    assert!(BandwidthLimiter::per_second(0).is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn burst_passes_without_delay() {
    let mut limiter = BandwidthLimiter::per_second(1_000).unwrap();
    let start = Instant::now();
    limiter.throttle(1_000).await;
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(limiter.burst(), 1_000);
  }

  #[tokio::test(start_paused = true)]
  async fn sustained_throughput_is_capped() {
    let mut limiter = BandwidthLimiter::per_second(1_000).unwrap();
    let start = Instant::now();

    for _ in 0..10 {
      limiter.throttle(1_000).await;
    }

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(9), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
  }

  #[tokio::test(start_paused = true)]
  async fn idle_time_refills_up_to_capacity() {
    let mut limiter = BandwidthLimiter::per_second(500).unwrap();
    limiter.throttle(500).await;
    assert!(limiter.available() < 1.0);

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(limiter.available(), 500.0);
  }
}
