use thiserror::Error;

/// Errors that can end a wait
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The retry budget ran out before the selector matched
    #[error(
        "Element not found after {retries} retries: '{selector}'. \
         Try: (1) Verify the selector is correct, \
         (2) Ensure the element is actually rendered, \
         (3) Increase the timeout."
    )]
    NotFound { selector: String, retries: u32 },

    /// The caller cancelled the wait before it settled
    #[error("Wait for '{selector}' cancelled after {retries} retries")]
    Cancelled { selector: String, retries: u32 },

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Timeout cannot exceed {max_ms}ms. Received: {received_ms}ms")]
    InvalidTimeout { received_ms: u64, max_ms: u64 },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Failed to observe mutations: {0}")]
    Observe(String),
}

impl WaitError {
    /// Selector the error refers to, when there is one
    pub fn selector(&self) -> Option<&str> {
        match self {
            WaitError::NotFound { selector, .. }
            | WaitError::Cancelled { selector, .. }
            | WaitError::InvalidSelector { selector, .. } => Some(selector),
            _ => None,
        }
    }

    /// Number of polling ticks spent before the wait ended
    pub fn retries(&self) -> Option<u32> {
        match self {
            WaitError::NotFound { retries, .. } | WaitError::Cancelled { retries, .. } => {
                Some(*retries)
            }
            _ => None,
        }
    }
}

pub type WaitResult<T> = Result<T, WaitError>;
