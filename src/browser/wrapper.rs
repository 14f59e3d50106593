//! Owned browser process with its handler task and profile directory

use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{BrowserError, BrowserResult};
use crate::BrowserConfig;
use crate::browser_setup::launch_browser;

/// A launched browser
///
/// Call [`shutdown`](Self::shutdown) for a clean exit. Dropping the session
/// only aborts the handler task and leaves the profile directory behind.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserSession {
    pub async fn launch(config: &BrowserConfig) -> BrowserResult<Self> {
        // Unique per process so concurrent runs do not fight over the profile lock
        let user_data_dir =
            std::env::temp_dir().join(format!("element_waiter_{}", std::process::id()));

        let (browser, handler) = launch_browser(config, user_data_dir.clone())
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("{e:#}")))?;

        Ok(Self {
            browser,
            handler,
            user_data_dir: Some(user_data_dir),
        })
    }

    /// Open a new page and navigate it to `url`
    pub async fn open_page(&self, url: &str, timeout: Duration) -> BrowserResult<Page> {
        check_page_url(url)?;

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;

        tokio::time::timeout(timeout, page.goto(url))
            .await
            .map_err(|_| BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis(),
            })?
            .map_err(|e| BrowserError::NavigationFailed(format!("{url}: {e}")))?;

        info!("Navigated to {}", url);
        Ok(page)
    }

    /// Close the browser, wait for the process to exit and remove the profile
    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down browser");

        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        // Chrome must release its file handles before the profile can be removed
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }

        if let Some(path) = self.user_data_dir.take()
            && let Err(e) = std::fs::remove_dir_all(&path)
        {
            warn!(
                "Failed to clean up profile dir {}: {}. Manual cleanup may be required.",
                path.display(),
                e
            );
        }

        Ok(())
    }
}

fn check_page_url(url: &str) -> BrowserResult<()> {
    if ["http://", "https://", "file://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
    {
        Ok(())
    } else {
        Err(BrowserError::NavigationFailed(format!(
            "URL must start with http://, https:// or file://: {url}"
        )))
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();

        if let Some(path) = &self.user_data_dir {
            warn!(
                "BrowserSession dropped without shutdown(); profile dir orphaned: {}",
                path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_web_and_file_urls_can_be_opened() {
        for url in ["http://localhost:8080/", "https://example.com", "file:///tmp/page.html"] {
            assert!(check_page_url(url).is_ok(), "expected '{url}' to be accepted");
        }

        for url in ["ftp://example.com", "about:blank", "javascript:alert(1)", "example.com", ""] {
            match check_page_url(url) {
                Err(BrowserError::NavigationFailed(msg)) => assert!(msg.contains(url)),
                other => panic!("expected '{url}' to be rejected, got {other:?}"),
            }
        }
    }
}
