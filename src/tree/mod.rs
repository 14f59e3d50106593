//! Observable trees the waiter can query and subscribe to
//!
//! An [`ObservableTree`] is anything that can answer CSS selector queries and
//! notify about child-list changes below its body. The waiter never touches a
//! browser directly; it only talks to this trait.

pub mod memory;
pub mod page;
pub(crate) mod selector;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::WaitResult;

pub use memory::{DocumentError, ElementSpec, MemoryDocument, MemoryElement, NodeId};
pub use page::PageTree;

/// A queryable tree that reports structural mutations
#[async_trait]
pub trait ObservableTree: Send + Sync {
    /// Handle to a matched element
    type Node: Send + 'static;

    /// First element in document order matching `selector`
    async fn query_one(&self, selector: &str) -> WaitResult<Option<Self::Node>>;

    /// Every element matching `selector`, in document order
    async fn query_all(&self, selector: &str) -> WaitResult<Vec<Self::Node>>;

    /// Subscribe to child-list changes anywhere below the body
    ///
    /// The observer stays connected until the returned subscription is dropped.
    async fn observe_mutations(&self) -> WaitResult<MutationSubscription>;
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Live mutation observer
///
/// Yields `()` once per observed mutation batch. Dropping the subscription
/// disconnects the observer; the release hook runs exactly once.
pub struct MutationSubscription {
    events: BoxStream<'static, ()>,
    release: Option<ReleaseHook>,
}

impl MutationSubscription {
    pub fn new(events: BoxStream<'static, ()>) -> Self {
        Self {
            events,
            release: None,
        }
    }

    /// Attach a hook that disconnects the underlying observer on drop
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(hook));
        self
    }

    /// Wait for the next mutation; `None` once the source has gone away
    pub async fn next(&mut self) -> Option<()> {
        self.events.next().await
    }
}

impl Drop for MutationSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for MutationSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationSubscription")
            .field("has_release_hook", &self.release.is_some())
            .finish()
    }
}
