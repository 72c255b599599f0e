//! Rate Limiter (Token Bucket Algorithm)
//!
//! Bounds build submissions per node. Lock-free: the bucket state lives in
//! one packed atomic updated with a CAS loop.

use apihub_core::error::{AppError, ErrorCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Token bucket with `burst` capacity refilled at `per_second`
pub struct RateLimiter {
    // Upper 32 bits: tokens. Lower 32 bits: last refill (ms since `origin`)
    packed: AtomicU64,
    origin: Instant,
    burst: u32,
    per_second: u32,
}

fn pack(tokens: u32, at_ms: u32) -> u64 {
    ((tokens as u64) << 32) | at_ms as u64
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, (packed & 0xFFFF_FFFF) as u32)
}

impl RateLimiter {
    pub fn new(burst: u32, per_second: u32) -> Self {
        Self {
            packed: AtomicU64::new(pack(burst, 0)),
            origin: Instant::now(),
            burst,
            per_second,
        }
    }

    /// Take one token; false when the bucket is empty
    pub fn try_acquire(&self) -> bool {
        loop {
            let packed = self.packed.load(Ordering::Acquire);
            let (tokens, last_ms) = unpack(packed);
            let now_ms = self.origin.elapsed().as_millis() as u32;
            let delta_ms = now_ms.saturating_sub(last_ms) as u64;

            let refill = delta_ms * self.per_second as u64 / 1000;
            let available = (tokens as u64 + refill).min(self.burst as u64) as u32;
            // Only advance the clock by the time actually converted into tokens
            let refill_ms = if self.per_second == 0 {
                0
            } else {
                refill * 1000 / self.per_second as u64
            };
            let next_ms = if available == self.burst {
                now_ms
            } else {
                last_ms.saturating_add(refill_ms as u32)
            };

            if available == 0 {
                let _ = self.packed.compare_exchange(
                    packed,
                    pack(0, next_ms),
                    Ordering::Release,
                    Ordering::Acquire,
                );
                return false;
            }
            if self
                .packed
                .compare_exchange(
                    packed,
                    pack(available - 1, next_ms),
                    Ordering::Release,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// [`Self::try_acquire`] as a coded error
    pub fn acquire(&self) -> Result<(), AppError> {
        if self.try_acquire() {
            Ok(())
        } else {
            Err(AppError::coded(
                ErrorCode::RateLimited,
                "Too many build submissions, retry later",
            ))
        }
    }

    /// Tokens left at the last update
    pub fn remaining(&self) -> u32 {
        unpack(self.packed.load(Ordering::Acquire)).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_allows_burst_then_rejects() {
        let limiter = RateLimiter::new(10, 1);
        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.remaining(), 0);
        let err = tokio_test::assert_err!(limiter.acquire());
        assert_eq!(err.code(), ErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::new(5, 20);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        sleep(Duration::from_millis(300)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_frequent_polling_does_not_starve() {
        let limiter = RateLimiter::new(1, 10);
        assert!(limiter.try_acquire());
        // Polling faster than the refill interval must still accumulate time
        let mut granted = false;
        for _ in 0..30 {
            sleep(Duration::from_millis(20)).await;
            if limiter.try_acquire() {
                granted = true;
                break;
            }
        }
        assert!(granted);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_respects_burst() {
        let limiter = Arc::new(RateLimiter::new(100, 1));
        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                (0..20).filter(|_| limiter.try_acquire()).count()
            }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert!(total <= 101, "allowed {}", total);
        assert!(total >= 100, "allowed {}", total);
    }
}
