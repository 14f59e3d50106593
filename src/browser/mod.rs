//! Browser session used to host a [`PageTree`](crate::tree::PageTree)

mod wrapper;

pub use wrapper::BrowserSession;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Navigation timeout after {timeout_ms}ms for URL: {url}")]
    NavigationTimeout { url: String, timeout_ms: u128 },
}

pub type BrowserResult<T> = Result<T, BrowserError>;
