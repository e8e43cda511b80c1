use crate::config::RateLimiterConfig;
use std::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Fixed-window permit scheme: `limit_for_period` permits become available
/// at the start of every refresh period. Callers wait for the next period
/// up to `timeout`, and are refused after that. Nothing is dropped silently.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<Window>,
}

struct Window {
    started_at: Instant,
    available: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttled;

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let available = config.limit_for_period;
        Self {
            config,
            state: Mutex::new(Window {
                started_at: Instant::now(),
                available,
            }),
        }
    }

    pub async fn acquire(&self) -> Result<(), Throttled> {
        let deadline = Instant::now() + self.config.timeout();
        loop {
            let next_refresh = {
                let mut window = self.state.lock().map_err(|_| Throttled)?;
                self.refresh(&mut window);
                if window.available > 0 {
                    window.available -= 1;
                    return Ok(());
                }
                window.started_at + self.config.limit_refresh_period()
            };
            if next_refresh > deadline {
                return Err(Throttled);
            }
            sleep_until(next_refresh).await;
        }
    }

    fn refresh(&self, window: &mut Window) {
        let period = self.config.limit_refresh_period();
        let elapsed = window.started_at.elapsed();
        if elapsed >= period {
            let periods = (elapsed.as_nanos() / period.as_nanos()) as u32;
            window.started_at += period * periods;
            window.available = self.config.limit_for_period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(limit: u32, timeout_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            limit_for_period: limit,
            limit_refresh_period_ms: 1_000,
            timeout_ms,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_next_period() {
        let limiter = limiter(2, 5_000);
        let start = Instant::now();
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttles_when_wait_exceeds_timeout() {
        let limiter = limiter(1, 100);
        limiter.acquire().await.unwrap();
        assert_eq!(limiter.acquire().await, Err(Throttled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_always_throttles() {
        let limiter = limiter(0, 2_500);
        assert_eq!(limiter.acquire().await, Err(Throttled));
    }
}
