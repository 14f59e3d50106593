//! Timeout validation for waits and navigation

use std::time::Duration;

use crate::WaiterConfig;
use crate::error::{WaitError, WaitResult};

/// Default wait timeout (30 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Upper bound for a single wait or navigation (5 minutes)
pub const MAX_WAIT_TIMEOUT_MS: u64 = 300_000;

/// Resolve an optional wait timeout against the configured default and maximum
///
/// # Example
/// ```rust
/// use element_waiter::{WaiterConfig, validate_wait_timeout};
///
/// let timeout = validate_wait_timeout(Some(5_000), &WaiterConfig::default())?;
/// assert_eq!(timeout.as_millis(), 5_000);
/// # Ok::<(), element_waiter::WaitError>(())
/// ```
pub fn validate_wait_timeout(
    timeout_ms: Option<u64>,
    config: &WaiterConfig,
) -> WaitResult<Duration> {
    bounded(timeout_ms.unwrap_or(config.default_timeout_ms), config.max_timeout_ms)
}

/// Same as [`validate_wait_timeout`] for page navigation
pub fn validate_navigation_timeout(
    timeout_ms: Option<u64>,
    config: &WaiterConfig,
) -> WaitResult<Duration> {
    bounded(
        timeout_ms.unwrap_or(config.navigation_timeout_ms),
        config.max_timeout_ms,
    )
}

fn bounded(ms: u64, max_ms: u64) -> WaitResult<Duration> {
    if ms > max_ms {
        return Err(WaitError::InvalidTimeout {
            received_ms: ms,
            max_ms,
        });
    }
    Ok(Duration::from_millis(ms))
}
