//! Observable tree over a live chromiumoxide page
//!
//! Queries go through CDP `DOM.querySelectorAll`. Mutations are observed by a
//! `MutationObserver` on `document.body` that reports back through a runtime
//! binding, so each notification arrives as an `EventBindingCalled` event.
//! One observer is shared per page and reference-counted in the page itself.

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::element::Element;
use futures::StreamExt;
use futures::future;
use tracing::{debug, warn};

use super::{MutationSubscription, ObservableTree};
use crate::error::{WaitError, WaitResult};

/// Runtime binding the in-page observer calls; must match the scripts below
const MUTATION_BINDING: &str = "__elementWaiterMutation";

const OBSERVE_SCRIPT: &str = r#"(() => {
  const state = window.__elementWaiter || (window.__elementWaiter = { count: 0, observer: null });
  state.count += 1;
  if (!state.observer) {
    state.observer = new MutationObserver(() => {
      try { window.__elementWaiterMutation("childList"); } catch (_) {}
    });
    const root = document.body || document.documentElement;
    state.observer.observe(root, { childList: true, subtree: true });
  }
  return state.count;
})()"#;

const RELEASE_SCRIPT: &str = r#"(() => {
  const state = window.__elementWaiter;
  if (!state) return 0;
  state.count = Math.max(0, state.count - 1);
  if (state.count === 0 && state.observer) {
    state.observer.disconnect();
    state.observer = null;
  }
  return state.count;
})()"#;

/// [`ObservableTree`] backed by a browser page
#[derive(Debug, Clone)]
pub struct PageTree {
    page: Page,
}

impl PageTree {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

#[async_trait]
impl ObservableTree for PageTree {
    type Node = Element;

    async fn query_one(&self, selector: &str) -> WaitResult<Option<Element>> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> WaitResult<Vec<Element>> {
        // No match is an empty list; errors are CDP or selector failures
        self.page
            .find_elements(selector)
            .await
            .map_err(|e| WaitError::Query(format!("'{selector}': {e}")))
    }

    async fn observe_mutations(&self) -> WaitResult<MutationSubscription> {
        self.page
            .execute(AddBindingParams::new(MUTATION_BINDING))
            .await
            .map_err(|e| WaitError::Observe(format!("failed to add runtime binding: {e}")))?;

        // Listen before the observer exists so no early mutation is lost
        let events = self
            .page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(|e| WaitError::Observe(format!("failed to listen for bindings: {e}")))?
            .filter(|event| future::ready(event.name == MUTATION_BINDING))
            .map(|_| ())
            .boxed();

        let observers = self
            .page
            .evaluate(OBSERVE_SCRIPT)
            .await
            .map_err(|e| WaitError::Observe(format!("failed to install observer: {e}")))?
            .into_value::<u64>()
            .unwrap_or_default();
        debug!("Mutation observer connected ({} active on page)", observers);

        let page = self.page.clone();
        Ok(MutationSubscription::new(events).on_release(move || {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!("No runtime available to disconnect mutation observer");
                return;
            };
            runtime.spawn(async move {
                if let Err(e) = page.evaluate(RELEASE_SCRIPT).await {
                    // The page may already be closed
                    debug!("Failed to release mutation observer: {}", e);
                }
            });
        }))
    }
}
