use crate::error::RailError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration. Every section has production defaults, so an
/// empty YAML document is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RailConfig {
    pub resilience: ResilienceConfig,
    pub authorization: AuthorizationConfig,
    pub idempotency: IdempotencyConfig,
}

impl RailConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, RailError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| RailError::RailConfiguration(format!("Invalid config: {}", e)))
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, RailError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RailError::RailConfiguration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub retry: RetryConfig,
    pub bulkhead: BulkheadConfig,
    pub timeout: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Percentage of failed or slow calls in the window that opens the circuit.
    pub failure_rate_threshold: f64,
    pub sliding_window_size: usize,
    pub minimum_number_of_calls: usize,
    pub wait_duration_in_open_state_ms: u64,
    pub permitted_calls_in_half_open_state: usize,
    pub slow_call_duration_threshold_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
            wait_duration_in_open_state_ms: 60_000,
            permitted_calls_in_half_open_state: 5,
            slow_call_duration_threshold_ms: 10_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn wait_duration_in_open_state(&self) -> Duration {
        Duration::from_millis(self.wait_duration_in_open_state_ms)
    }

    pub fn slow_call_duration_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_duration_threshold_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub limit_for_period: u32,
    pub limit_refresh_period_ms: u64,
    /// How long a caller may wait for a permit before being throttled.
    pub timeout_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit_for_period: 100,
            limit_refresh_period_ms: 1_000,
            timeout_ms: 5_000,
        }
    }
}

impl RateLimiterConfig {
    pub fn limit_refresh_period(&self) -> Duration {
        Duration::from_millis(self.limit_refresh_period_ms.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    pub max_concurrent_calls: usize,
    pub max_wait_duration_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 25,
            max_wait_duration_ms: 10_000,
        }
    }
}

impl BulkheadConfig {
    pub fn max_wait_duration(&self) -> Duration {
        Duration::from_millis(self.max_wait_duration_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl TimeoutConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Lifetime of a non-terminal authorization before the reaper expires it.
    pub ttl_secs: i64,
    pub otp_challenge_ttl_secs: i64,
    pub redirect_challenge_ttl_secs: i64,
    /// Failed SCA responses tolerated before the authorization is declined.
    pub max_authentication_attempts: u32,
    /// Require SCA even when the rail does not ask for it.
    pub always_require_sca: bool,
    pub allow_sca_exemptions: bool,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            otp_challenge_ttl_secs: 5 * 60,
            redirect_challenge_ttl_secs: 10 * 60,
            max_authentication_attempts: 3,
            always_require_sca: false,
            allow_sca_exemptions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub window_secs: i64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            window_secs: 24 * 60 * 60,
        }
    }
}
