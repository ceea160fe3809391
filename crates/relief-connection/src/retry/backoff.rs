//! Exponential backoff calculator for retries
//!
//! Implements exponential backoff with optional jitter, so callers that hit
//! an exhausted pool at the same moment do not all come back at once.

use std::time::Duration;

/// Exponential backoff strategy.
///
/// Attempt `n` (zero-based) waits `initial * multiplier^n`, capped at the
/// maximum.
///
/// # Example
///
/// ```
/// use relief_connection::retry::BackoffStrategy;
/// use std::time::Duration;
///
/// let backoff = BackoffStrategy::new(500, 30_000);
///
/// assert_eq!(backoff.calculate_delay(0), Duration::from_millis(500));
/// assert_eq!(backoff.calculate_delay(1), Duration::from_millis(1000));
/// assert_eq!(backoff.calculate_delay(2), Duration::from_millis(2000));
///
/// // Delay grows exponentially but is capped at max
/// assert!(backoff.calculate_delay(20) <= Duration::from_millis(30_000));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    /// Delay in milliseconds before the first retry
    initial_ms: u64,
    /// Cap for exponential growth in milliseconds
    max_ms: u64,
    /// Growth factor per attempt (default: 2.0)
    multiplier: f64,
    /// Whether to spread delays by up to ±25% (default: false)
    jitter: bool,
}

impl BackoffStrategy {
    /// Create a new backoff strategy with the given initial and maximum delays.
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms: initial_ms.max(1),
            max_ms: max_ms.max(initial_ms),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set the multiplier for exponential growth. Values below 1.0 are
    /// raised to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Enable jitter to add randomness to delays.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay before retry number `attempt` (0 = first retry).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_ms as f64) * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_ms as f64) as u64;

        let final_ms = if self.jitter {
            let jitter_range = capped_ms / 4;
            let jitter = (rand::random::<f64>() * (jitter_range * 2) as f64) as u64;
            capped_ms
                .saturating_sub(jitter_range)
                .saturating_add(jitter)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn has_jitter(&self) -> bool {
        self.jitter
    }
}

impl Default for BackoffStrategy {
    /// Default backoff: 500ms initial, 30 seconds max, 2x multiplier
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}
