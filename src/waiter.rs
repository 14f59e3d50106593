//! Wait for CSS selectors to start matching
//!
//! Provides [`ElementWaiter`], which resolves a selector against an
//! [`ObservableTree`] while tolerating elements that are rendered later.
//!
//! # Strategy
//! 1. Query once. A match returns immediately without arming anything.
//! 2. Otherwise arm two redundant watchers and race them:
//!    - a polling timer that re-queries every poll interval and counts retries,
//!    - a mutation subscription that re-queries on every child-list change.
//! 3. The first watcher to see a match settles the wait. Both watchers are
//!    owned by one [`RetryState`] that is dropped on settlement, so the loser
//!    is disarmed exactly once.
//!
//! The timeout is tick-counted: the retry budget is
//! `floor(timeout / poll_interval)` ticks, which with the default one second
//! interval is `floor(timeout_ms / 1000)`. It is not a wall-clock deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::WaiterConfig;
use crate::error::{WaitError, WaitResult};
use crate::tree::{MutationSubscription, ObservableTree};

/// Whether a wait resolves with the first match or with every match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    One,
    All,
}

/// Parameters of a single wait call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitRequest {
    selector: String,
    timeout: Duration,
    mode: WaitMode,
}

impl WaitRequest {
    pub fn new(selector: impl Into<String>, mode: WaitMode) -> Self {
        Self {
            selector: selector.into(),
            timeout: Duration::from_millis(crate::timeout::DEFAULT_WAIT_TIMEOUT_MS),
            mode,
        }
    }

    pub fn one(selector: impl Into<String>) -> Self {
        Self::new(selector, WaitMode::One)
    }

    pub fn all(selector: impl Into<String>) -> Self {
        Self::new(selector, WaitMode::All)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> WaitMode {
        self.mode
    }

    /// Number of polling ticks this request may spend before failing
    pub fn retry_budget(&self, poll_interval: Duration) -> u32 {
        let ticks = self.timeout.as_millis() / poll_interval.as_millis().max(1);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

/// Successful result of a wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<N> {
    One(N),
    /// Never empty; document order
    All(Vec<N>),
}

impl<N> WaitOutcome<N> {
    pub fn len(&self) -> usize {
        match self {
            WaitOutcome::One(_) => 1,
            WaitOutcome::All(nodes) => nodes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_first(self) -> Option<N> {
        match self {
            WaitOutcome::One(node) => Some(node),
            WaitOutcome::All(nodes) => nodes.into_iter().next(),
        }
    }

    pub fn into_vec(self) -> Vec<N> {
        match self {
            WaitOutcome::One(node) => vec![node],
            WaitOutcome::All(nodes) => nodes,
        }
    }
}

/// Watchers armed for one in-flight wait
///
/// Dropping this value disarms both the timer and the mutation observer.
struct RetryState {
    retry_count: u32,
    budget: u32,
    ticker: Interval,
    mutations: MutationSubscription,
    /// Cleared when the mutation source ends; polling carries on alone
    observing: bool,
}

impl Drop for RetryState {
    fn drop(&mut self) {
        debug!(
            "Disarming watchers after {}/{} retries",
            self.retry_count, self.budget
        );
    }
}

/// Waits for selectors to match in an [`ObservableTree`]
pub struct ElementWaiter<T: ObservableTree> {
    tree: Arc<T>,
    poll_interval: Duration,
    default_timeout: Duration,
}

impl<T: ObservableTree> ElementWaiter<T> {
    pub fn new(tree: T) -> Self {
        Self::shared(Arc::new(tree))
    }

    /// Use a tree that is also held elsewhere
    pub fn shared(tree: Arc<T>) -> Self {
        Self::shared_with_config(tree, &WaiterConfig::default())
    }

    pub fn from_config(tree: T, config: &WaiterConfig) -> Self {
        Self::shared_with_config(Arc::new(tree), config)
    }

    pub fn shared_with_config(tree: Arc<T>, config: &WaiterConfig) -> Self {
        Self {
            tree,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            default_timeout: Duration::from_millis(config.default_timeout_ms),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Wait for the first element matching `selector`
    pub async fn wait_for_one(&self, selector: &str, timeout: Duration) -> WaitResult<T::Node> {
        self.wait_for_one_cancellable(selector, timeout, &CancellationToken::new())
            .await
    }

    /// Wait until `selector` matches at least one element, returning all of them
    pub async fn wait_for_all(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> WaitResult<Vec<T::Node>> {
        self.wait_for_all_cancellable(selector, timeout, &CancellationToken::new())
            .await
    }

    pub async fn wait_for_one_with_default(&self, selector: &str) -> WaitResult<T::Node> {
        self.wait_for_one(selector, self.default_timeout).await
    }

    pub async fn wait_for_all_with_default(&self, selector: &str) -> WaitResult<Vec<T::Node>> {
        self.wait_for_all(selector, self.default_timeout).await
    }

    pub async fn wait_for_one_cancellable(
        &self,
        selector: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> WaitResult<T::Node> {
        let request = WaitRequest::one(selector).with_timeout(timeout);
        match self.wait(&request, cancel).await? {
            WaitOutcome::One(node) => Ok(node),
            WaitOutcome::All(_) => unreachable!("single-element wait resolved with a list"),
        }
    }

    pub async fn wait_for_all_cancellable(
        &self,
        selector: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> WaitResult<Vec<T::Node>> {
        let request = WaitRequest::all(selector).with_timeout(timeout);
        Ok(self.wait(&request, cancel).await?.into_vec())
    }

    /// Run one wait to completion
    ///
    /// # Returns
    /// * `Ok(WaitOutcome)` - The selector matched, immediately or while watching
    /// * `Err(WaitError::NotFound)` - The retry budget ran out
    /// * `Err(WaitError::Cancelled)` - `cancel` fired while watching
    /// * `Err(_)` - The tree rejected the selector or failed to observe
    ///
    /// A token that is already cancelled does not stop an immediate match.
    pub async fn wait(
        &self,
        request: &WaitRequest,
        cancel: &CancellationToken,
    ) -> WaitResult<WaitOutcome<T::Node>> {
        if let Some(outcome) = self.find_matches(request).await? {
            debug!(
                "Matched '{}' immediately ({} element(s))",
                request.selector,
                outcome.len()
            );
            return Ok(outcome);
        }

        warn!(
            "Element not found: '{}'. Watching for up to {}ms",
            request.selector,
            request.timeout.as_millis()
        );
        let mut state = self.arm(request).await?;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Wait for '{}' cancelled", request.selector);
                    return Err(WaitError::Cancelled {
                        selector: request.selector.clone(),
                        retries: state.retry_count,
                    });
                }

                _ = state.ticker.tick() => {
                    if let Some(outcome) = self.find_matches(request).await? {
                        info!(
                            "Matched '{}' on poll after {} retries",
                            request.selector, state.retry_count
                        );
                        return Ok(outcome);
                    }

                    state.retry_count += 1;
                    if state.retry_count >= state.budget {
                        warn!(
                            "Giving up on '{}' after {} retries",
                            request.selector, state.retry_count
                        );
                        return Err(WaitError::NotFound {
                            selector: request.selector.clone(),
                            retries: state.retry_count,
                        });
                    }
                    debug!(
                        "Element not found: '{}', retrying ({}/{})",
                        request.selector, state.retry_count, state.budget
                    );
                }

                event = state.mutations.next(), if state.observing => {
                    if event.is_none() {
                        debug!("Mutation source closed, polling only for '{}'", request.selector);
                        state.observing = false;
                        continue;
                    }
                    if let Some(outcome) = self.find_matches(request).await? {
                        info!(
                            "Matched '{}' on mutation after {} retries",
                            request.selector, state.retry_count
                        );
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    async fn find_matches(
        &self,
        request: &WaitRequest,
    ) -> WaitResult<Option<WaitOutcome<T::Node>>> {
        match request.mode {
            WaitMode::One => Ok(self
                .tree
                .query_one(&request.selector)
                .await?
                .map(WaitOutcome::One)),
            WaitMode::All => {
                let nodes = self.tree.query_all(&request.selector).await?;
                Ok((!nodes.is_empty()).then_some(WaitOutcome::All(nodes)))
            }
        }
    }

    async fn arm(&self, request: &WaitRequest) -> WaitResult<RetryState> {
        let mutations = self.tree.observe_mutations().await?;

        // First tick one full interval after arming
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(RetryState {
            retry_count: 0,
            budget: request.retry_budget(self.poll_interval),
            ticker,
            mutations,
            observing: true,
        })
    }
}

impl<T: ObservableTree> Clone for ElementWaiter<T> {
    fn clone(&self) -> Self {
        Self {
            tree: Arc::clone(&self.tree),
            poll_interval: self.poll_interval,
            default_timeout: self.default_timeout,
        }
    }
}

impl<T: ObservableTree> std::fmt::Debug for ElementWaiter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementWaiter")
            .field("poll_interval", &self.poll_interval)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
