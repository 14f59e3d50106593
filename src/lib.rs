//! Wait for CSS selectors to match in a DOM
//!
//! [`ElementWaiter`] resolves a selector against any [`ObservableTree`]: a
//! live chromiumoxide page ([`PageTree`]) or an in-memory document
//! ([`MemoryDocument`]). It checks once, then races a polling timer against a
//! mutation observer until the selector matches or the retry budget runs out.

mod browser;
pub mod browser_setup;
mod error;
mod timeout;
pub mod tree;
mod waiter;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub waiter: WaiterConfig,

    #[serde(default)]
    pub browser: BrowserConfig,
}

/// Timing for element waits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterConfig {
    /// Timeout used when the caller does not give one
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Interval between polling ticks; one tick is one retry
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest timeout accepted for a wait or navigation
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, etc.)
    /// WARNING: Only enable for trusted content
    #[serde(default = "default_disable_security")]
    pub disable_security: bool,

    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

fn default_timeout_ms() -> u64 {
    timeout::DEFAULT_WAIT_TIMEOUT_MS
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_timeout_ms() -> u64 {
    timeout::MAX_WAIT_TIMEOUT_MS
}
fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_headless() -> bool {
    true
}

fn default_disable_security() -> bool {
    false
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: default_disable_security(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

/// Load config from config.yaml in package root, falling back to defaults
pub fn load_yaml_config() -> anyhow::Result<Config> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml");

    if config_path.exists() {
        load_yaml_config_from(&config_path)
    } else {
        Ok(Config::default())
    }
}

/// Load config from an explicit YAML file
pub fn load_yaml_config_from(path: &Path) -> anyhow::Result<Config> {
    let contents = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

pub use browser::{BrowserError, BrowserResult, BrowserSession};
pub use error::{WaitError, WaitResult};
pub use timeout::{
    DEFAULT_WAIT_TIMEOUT_MS, MAX_WAIT_TIMEOUT_MS, validate_navigation_timeout,
    validate_wait_timeout,
};
pub use tree::{
    DocumentError, ElementSpec, MemoryDocument, MemoryElement, MutationSubscription, NodeId,
    ObservableTree, PageTree,
};
pub use waiter::{ElementWaiter, WaitMode, WaitOutcome, WaitRequest};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "waiter:\n  poll_interval_ms: 250\nbrowser:\n  headless: false\n",
        )
        .unwrap();
        assert_eq!(config.waiter.poll_interval_ms, 250);
        assert_eq!(config.waiter.default_timeout_ms, 30_000);
        assert_eq!(config.waiter.max_timeout_ms, 300_000);
        assert!(!config.browser.headless);
        assert!(!config.browser.disable_security);
        assert_eq!(config.browser.window.width, 1280);
    }

    #[test]
    fn loads_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waiter.yaml");
        fs::write(&path, "waiter:\n  default_timeout_ms: 5000\n").unwrap();

        let config = load_yaml_config_from(&path).unwrap();
        assert_eq!(config.waiter.default_timeout_ms, 5000);
        assert_eq!(config.waiter.poll_interval_ms, 1000);
        assert!(load_yaml_config_from(&dir.path().join("missing.yaml")).is_err());
    }
}
