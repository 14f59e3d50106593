//! In-memory observable DOM
//!
//! `MemoryDocument` is a small `html > body` element tree with selector
//! queries and child-list notifications. It backs the waiter in tests and in
//! hosts that have no browser. Attribute changes are deliberately silent, the
//! same way a `childList`-only mutation observer ignores them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use super::selector::{SelectorList, SelectorTarget};
use super::{MutationSubscription, ObservableTree};
use crate::error::{WaitError, WaitResult};

const ROOT: usize = 0;
const BODY: usize = 1;

/// Pending notifications kept per observer before it starts lagging
const MUTATION_CHANNEL_CAPACITY: usize = 64;

/// Stable handle to a node in a [`MemoryDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Unknown or detached node: {0:?}")]
    UnknownNode(NodeId),

    #[error("Cannot remove the document root or body: {0:?}")]
    ProtectedNode(NodeId),
}

/// Description of an element (and its subtree) to insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    tag: String,
    attributes: Vec<(String, String)>,
    children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.attr("id", id)
    }

    /// Adds a class, keeping any already present
    pub fn class(mut self, class: impl Into<String>) -> Self {
        let class = class.into();
        match self.attributes.iter_mut().find(|(name, _)| name == "class") {
            Some((_, existing)) => {
                existing.push(' ');
                existing.push_str(&class);
            }
            None => self.attributes.push(("class".to_string(), class)),
        }
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        set_attribute(&mut self.attributes, name.into(), value.into());
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }
}

/// Snapshot of a matched element, taken at query time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryElement {
    node: NodeId,
    tag: String,
    attributes: Vec<(String, String)>,
}

impl MemoryElement {
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn tag_name(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }
}

struct NodeData {
    tag: String,
    attributes: Vec<(String, String)>,
    parent: Option<usize>,
    children: Vec<usize>,
}

struct DocumentState {
    /// Removed nodes leave a `None` slot so ids are never reused
    nodes: Vec<Option<NodeData>>,
}

impl DocumentState {
    fn node(&self, id: usize) -> Option<&NodeData> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    fn insert(&mut self, parent: usize, spec: ElementSpec) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Some(NodeData {
            tag: spec.tag,
            attributes: spec.attributes,
            parent: Some(parent),
            children: Vec::new(),
        }));
        if let Some(Some(parent_node)) = self.nodes.get_mut(parent) {
            parent_node.children.push(id);
        }
        for child in spec.children {
            self.insert(id, child);
        }
        id
    }

    fn remove_subtree(&mut self, id: usize) {
        let Some(node) = self.nodes.get_mut(id).and_then(Option::take) else {
            return;
        };
        for child in node.children {
            self.remove_subtree(child);
        }
    }

    fn snapshot(&self, id: usize) -> Option<MemoryElement> {
        self.node(id).map(|node| MemoryElement {
            node: NodeId(id),
            tag: node.tag.clone(),
            attributes: node.attributes.clone(),
        })
    }

    /// Pre-order walk from the root, i.e. document order
    fn select(&self, selector: &SelectorList, first_only: bool) -> Vec<MemoryElement> {
        let mut found = Vec::new();
        let mut stack = vec![ROOT];

        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if selector.matches(self, id)
                && let Some(element) = self.snapshot(id)
            {
                found.push(element);
                if first_only {
                    break;
                }
            }
            stack.extend(node.children.iter().rev().copied());
        }

        found
    }
}

impl SelectorTarget for DocumentState {
    type Id = usize;

    fn tag_name(&self, id: usize) -> &str {
        self.node(id).map_or("", |node| node.tag.as_str())
    }

    fn attribute(&self, id: usize, name: &str) -> Option<&str> {
        self.node(id)?
            .attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn parent_element(&self, id: usize) -> Option<usize> {
        self.node(id)?.parent
    }
}

struct DocumentInner {
    state: RwLock<DocumentState>,
    mutations: broadcast::Sender<()>,
    queries: AtomicUsize,
}

/// Shared handle to an in-memory document; clones see the same tree
#[derive(Clone)]
pub struct MemoryDocument {
    inner: Arc<DocumentInner>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        let mut state = DocumentState { nodes: Vec::new() };
        state.nodes.push(Some(NodeData {
            tag: "html".to_string(),
            attributes: Vec::new(),
            parent: None,
            children: Vec::new(),
        }));
        state.insert(ROOT, ElementSpec::new("body"));

        let (mutations, _) = broadcast::channel(MUTATION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(DocumentInner {
                state: RwLock::new(state),
                mutations,
                queries: AtomicUsize::new(0),
            }),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(ROOT)
    }

    pub fn body(&self) -> NodeId {
        NodeId(BODY)
    }

    /// Append `spec` (with its children) as the last child of `parent`
    ///
    /// Notifies observers once for the whole inserted subtree.
    pub fn append_child(&self, parent: NodeId, spec: ElementSpec) -> Result<NodeId, DocumentError> {
        let id = {
            let mut state = self.inner.state.write();
            if state.node(parent.0).is_none() {
                return Err(DocumentError::UnknownNode(parent));
            }
            state.insert(parent.0, spec)
        };
        self.notify("append_child");
        Ok(NodeId(id))
    }

    /// Detach `node` and drop its subtree
    pub fn remove(&self, node: NodeId) -> Result<(), DocumentError> {
        if node.0 == ROOT || node.0 == BODY {
            return Err(DocumentError::ProtectedNode(node));
        }
        {
            let mut state = self.inner.state.write();
            let parent = state
                .node(node.0)
                .ok_or(DocumentError::UnknownNode(node))?
                .parent;
            if let Some(Some(parent_node)) = parent.and_then(|p| state.nodes.get_mut(p)) {
                parent_node.children.retain(|child| *child != node.0);
            }
            state.remove_subtree(node.0);
        }
        self.notify("remove");
        Ok(())
    }

    /// Set an attribute in place. Does not notify observers.
    pub fn set_attribute(
        &self,
        node: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), DocumentError> {
        let mut state = self.inner.state.write();
        let data = state
            .nodes
            .get_mut(node.0)
            .and_then(Option::as_mut)
            .ok_or(DocumentError::UnknownNode(node))?;
        set_attribute(&mut data.attributes, name.into(), value.into());
        Ok(())
    }

    pub fn element(&self, node: NodeId) -> Option<MemoryElement> {
        self.inner.state.read().snapshot(node.0)
    }

    /// Number of mutation subscriptions currently connected
    pub fn observer_count(&self) -> usize {
        self.inner.mutations.receiver_count()
    }

    /// Number of selector queries answered so far
    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    fn select(&self, selector: &str, first_only: bool) -> WaitResult<Vec<MemoryElement>> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);
        let parsed = SelectorList::parse(selector).map_err(|reason| WaitError::InvalidSelector {
            selector: selector.to_string(),
            reason,
        })?;
        Ok(self.inner.state.read().select(&parsed, first_only))
    }

    fn notify(&self, operation: &str) {
        // No receivers just means nobody is waiting
        let delivered = self.inner.mutations.send(()).unwrap_or(0);
        trace!("{} notified {} observer(s)", operation, delivered);
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes = self.inner.state.read().nodes.iter().flatten().count();
        f.debug_struct("MemoryDocument")
            .field("nodes", &nodes)
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[async_trait]
impl ObservableTree for MemoryDocument {
    type Node = MemoryElement;

    async fn query_one(&self, selector: &str) -> WaitResult<Option<MemoryElement>> {
        Ok(self.select(selector, true)?.into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> WaitResult<Vec<MemoryElement>> {
        self.select(selector, false)
    }

    async fn observe_mutations(&self) -> WaitResult<MutationSubscription> {
        let events = BroadcastStream::new(self.inner.mutations.subscribe())
            // A lagged receiver still means something changed
            .map(|_| ())
            .boxed();
        Ok(MutationSubscription::new(events))
    }
}

// Attribute names are ASCII case-insensitive, stored lowercased
fn set_attribute(attributes: &mut Vec<(String, String)>, mut name: String, value: String) {
    name.make_ascii_lowercase();
    match attributes.iter_mut().find(|(key, _)| *key == name) {
        Some((_, existing)) => *existing = value,
        None => attributes.push((name, value)),
    }
}
