//! Shared document model
//!
//! [`Document`] is a cheaply clonable handle; every clone sees the same tree.
//! Mutations take a short write lock and never hold it across an `.await`.

use crate::element::{Element, LoadOutcome, NodeId, Tag};
use crate::error::DomError;
use crate::feed::{Change, ChangeFeed, DomEvent};
use crate::geometry::{Rect, Viewport};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default number of buffered changes per subscriber before it lags
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Tree {
    nodes: HashMap<NodeId, Element>,
    next_id: u64,
    root: NodeId,
    head: NodeId,
    body: NodeId,
}

impl Tree {
    fn new() -> Self {
        let mut tree = Self {
            nodes: HashMap::new(),
            next_id: 0,
            root: NodeId::new(0),
            head: NodeId::new(0),
            body: NodeId::new(0),
        };
        let root = tree.alloc(Tag::Html);
        let head = tree.alloc(Tag::Head);
        let body = tree.alloc(Tag::Body);
        tree.link(root, head);
        tree.link(root, body);
        tree.root = root;
        tree.head = head;
        tree.body = body;
        tree
    }

    fn alloc(&mut self, tag: Tag) -> NodeId {
        self.next_id += 1;
        let id = NodeId::new(self.next_id);
        self.nodes.insert(id, Element::new(tag));
        id
    }

    fn get(&self, id: NodeId) -> Result<&Element, DomError> {
        self.nodes.get(&id).ok_or(DomError::UnknownNode(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Element, DomError> {
        self.nodes.get_mut(&id).ok_or(DomError::UnknownNode(id))
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }
    }

    fn unlink(&mut self, child: NodeId) {
        let parent = self.nodes.get_mut(&child).and_then(|c| c.parent.take());
        if let Some(parent) = parent {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|c| *c != child);
            }
        }
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut cursor = Some(of);
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|e| e.parent);
        }
        false
    }

    fn is_connected(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id) && self.is_ancestor_or_self(self.root, id)
    }

    fn forget(&mut self, id: NodeId) {
        for node in self.descendants(id) {
            self.nodes.remove(&node);
        }
    }

    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(element) = self.nodes.get(&next) else {
                continue;
            };
            out.push(next);
            stack.extend(element.children.iter().rev().copied());
        }
        out
    }
}

#[derive(Debug)]
struct Inner {
    tree: RwLock<Tree>,
    viewport: RwLock<Viewport>,
    events: broadcast::Sender<Change>,
    sequence: Mutex<u64>,
}

/// The page as seen by the pipeline
///
/// A fresh document has `<html>` with an empty `<head>` and `<body>`.
#[derive(Debug, Clone)]
pub struct Document {
    inner: Arc<Inner>,
}

impl Document {
    /// Create an empty document with the default viewport
    #[must_use]
    pub fn new() -> Self {
        Self::with_viewport(Viewport::default())
    }

    /// Create an empty document with `viewport`
    #[must_use]
    pub fn with_viewport(viewport: Viewport) -> Self {
        Self::with_feed_capacity(viewport, DEFAULT_FEED_CAPACITY)
    }

    /// Create an empty document with a custom change-feed buffer
    #[must_use]
    pub fn with_feed_capacity(viewport: Viewport, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tree: RwLock::new(Tree::new()),
                viewport: RwLock::new(viewport),
                events,
                sequence: Mutex::new(0),
            }),
        }
    }

    /// `<html>` element
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.inner.tree.read().root
    }

    /// `<head>` element
    #[must_use]
    pub fn head(&self) -> NodeId {
        self.inner.tree.read().head
    }

    /// `<body>` element
    #[must_use]
    pub fn body(&self) -> NodeId {
        self.inner.tree.read().body
    }

    /// Current viewport
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        *self.inner.viewport.read()
    }

    /// Replace the viewport (resize or scroll)
    pub fn set_viewport(&self, viewport: Viewport) {
        *self.inner.viewport.write() = viewport;
    }

    /// Subscribe to future changes
    #[must_use]
    pub fn subscribe(&self) -> ChangeFeed {
        ChangeFeed::new(self.inner.events.subscribe())
    }

    /// Sequence number of the most recent change (0 before any change)
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        *self.inner.sequence.lock()
    }

    fn emit(&self, event: DomEvent) {
        let mut sequence = self.inner.sequence.lock();
        *sequence += 1;
        let change = Change {
            sequence: *sequence,
            event,
        };
        // No subscribers is fine; the change is simply not observed.
        let _ = self.inner.events.send(change);
        tracing::trace!(sequence = change.sequence, ?event, "document change");
    }

    /// Create a detached element
    pub fn create_element(&self, tag: impl Into<Tag>) -> NodeId {
        self.inner.tree.write().alloc(tag.into())
    }

    /// Create a detached element with attributes (`class` fills the class list)
    pub fn create_element_with(&self, tag: impl Into<Tag>, attributes: &[(&str, &str)]) -> Result<NodeId, DomError> {
        for (name, _) in attributes {
            validate_attribute_name(name)?;
        }
        let mut tree = self.inner.tree.write();
        let id = tree.alloc(tag.into());
        let element = tree.get_mut(id)?;
        for (name, value) in attributes {
            element.put_attribute(name, (*value).to_string());
        }
        Ok(id)
    }

    /// Create an element with attributes and append it to `parent`
    ///
    /// Attributes are in place before the insertion is announced.
    pub fn append_new(
        &self,
        parent: NodeId,
        tag: impl Into<Tag>,
        attributes: &[(&str, &str)],
    ) -> Result<NodeId, DomError> {
        let id = self.create_element_with(tag, attributes)?;
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// Append `child` (with its subtree) as the last child of `parent`
    ///
    /// An attached `child` is moved. Insertions into the connected tree are
    /// announced on the change feed; building a detached fragment is silent.
    ///
    /// # Errors
    /// - `DomError::UnknownNode` if either id is unknown
    /// - `DomError::HierarchyRequest` if `child` is `parent` or one of its ancestors
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let (was_connected, now_connected) = {
            let mut tree = self.inner.tree.write();
            tree.get(parent)?;
            tree.get(child)?;
            if tree.is_ancestor_or_self(child, parent) {
                return Err(DomError::HierarchyRequest { parent, child });
            }
            let was_connected = tree.is_connected(child);
            tree.unlink(child);
            tree.link(parent, child);
            (was_connected, tree.is_connected(parent))
        };

        if was_connected {
            self.emit(DomEvent::Removed { node: child });
        }
        if now_connected {
            self.emit(DomEvent::Inserted {
                parent,
                node: child,
            });
        }
        Ok(())
    }

    /// Detach `node` from its parent
    ///
    /// # Errors
    /// `DomError::UnknownNode` if the id is unknown
    pub fn detach(&self, node: NodeId) -> Result<(), DomError> {
        let was_connected = {
            let mut tree = self.inner.tree.write();
            tree.get(node)?;
            let connected = tree.is_connected(node);
            tree.unlink(node);
            connected
        };
        if was_connected {
            self.emit(DomEvent::Removed { node });
        }
        Ok(())
    }

    /// Remove `node` and its subtree from the document for good
    ///
    /// Later lookups of any removed id fail with `DomError::UnknownNode`.
    ///
    /// # Errors
    /// - `DomError::UnknownNode` if the id is unknown
    /// - `DomError::HierarchyRequest` for the root, head or body
    pub fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let was_connected = {
            let mut tree = self.inner.tree.write();
            tree.get(node)?;
            if node == tree.root || node == tree.head || node == tree.body {
                let parent = tree.get(node)?.parent.unwrap_or(tree.root);
                return Err(DomError::HierarchyRequest { parent, child: node });
            }
            let connected = tree.is_connected(node);
            tree.unlink(node);
            tree.forget(node);
            connected
        };
        if was_connected {
            self.emit(DomEvent::Removed { node });
        }
        Ok(())
    }

    /// Snapshot of an element
    #[must_use]
    pub fn element(&self, node: NodeId) -> Option<Element> {
        self.inner.tree.read().nodes.get(&node).cloned()
    }

    /// Tag of an element
    #[must_use]
    pub fn tag(&self, node: NodeId) -> Option<Tag> {
        self.inner.tree.read().nodes.get(&node).map(|e| e.tag.clone())
    }

    /// Attribute value
    #[must_use]
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.inner
            .tree
            .read()
            .nodes
            .get(&node)
            .and_then(|e| e.attributes.get(name).cloned())
    }

    /// Whether the attribute is present
    #[must_use]
    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.inner
            .tree
            .read()
            .nodes
            .get(&node)
            .is_some_and(|e| e.attributes.contains_key(name))
    }

    /// Set an attribute
    ///
    /// `class` is split into the class list.
    ///
    /// # Errors
    /// - `DomError::UnknownNode` if the id is unknown
    /// - `DomError::InvalidAttribute` for empty or whitespace-containing names
    pub fn set_attribute(&self, node: NodeId, name: &str, value: impl Into<String>) -> Result<(), DomError> {
        validate_attribute_name(name)?;
        let mut tree = self.inner.tree.write();
        tree.get_mut(node)?.put_attribute(name, value.into());
        Ok(())
    }

    /// Remove an attribute, returning its old value
    ///
    /// # Errors
    /// `DomError::UnknownNode` if the id is unknown
    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Result<Option<String>, DomError> {
        let mut tree = self.inner.tree.write();
        Ok(tree.get_mut(node)?.attributes.shift_remove(name))
    }

    /// Add a class
    ///
    /// # Errors
    /// `DomError::UnknownNode` if the id is unknown
    pub fn add_class(&self, node: NodeId, class: &str) -> Result<(), DomError> {
        let mut tree = self.inner.tree.write();
        tree.get_mut(node)?.classes.insert(class.to_string());
        Ok(())
    }

    /// Remove a class
    ///
    /// # Errors
    /// `DomError::UnknownNode` if the id is unknown
    pub fn remove_class(&self, node: NodeId, class: &str) -> Result<(), DomError> {
        let mut tree = self.inner.tree.write();
        tree.get_mut(node)?.classes.shift_remove(class);
        Ok(())
    }

    /// Whether the element carries `class`
    #[must_use]
    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.inner
            .tree
            .read()
            .nodes
            .get(&node)
            .is_some_and(|e| e.classes.contains(class))
    }

    /// Record the layout box of an element
    ///
    /// # Errors
    /// `DomError::UnknownNode` if the id is unknown
    pub fn set_bounds(&self, node: NodeId, bounds: Rect) -> Result<(), DomError> {
        let mut tree = self.inner.tree.write();
        tree.get_mut(node)?.bounds = Some(bounds);
        Ok(())
    }

    /// Layout box of an element, if the host reported one
    #[must_use]
    pub fn bounds(&self, node: NodeId) -> Option<Rect> {
        self.inner.tree.read().nodes.get(&node).and_then(|e| e.bounds)
    }

    /// Whether `node` is reachable from the root
    #[must_use]
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.inner.tree.read().is_connected(node)
    }

    /// `node` and all of its descendants, in document order
    #[must_use]
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.tree.read().descendants(node)
    }

    /// Report that the resource behind `node` finished loading
    ///
    /// The outcome is remembered on the element, see [`Document::load_outcome`].
    ///
    /// # Errors
    /// `DomError::UnknownNode` if the id is unknown
    pub fn dispatch_load(&self, node: NodeId) -> Result<(), DomError> {
        self.inner.tree.write().get_mut(node)?.load = Some(LoadOutcome::Loaded);
        self.emit(DomEvent::Loaded { node });
        Ok(())
    }

    /// Report that the resource behind `node` failed to load
    ///
    /// # Errors
    /// `DomError::UnknownNode` if the id is unknown
    pub fn dispatch_load_failed(&self, node: NodeId) -> Result<(), DomError> {
        self.inner.tree.write().get_mut(node)?.load = Some(LoadOutcome::Failed);
        self.emit(DomEvent::LoadFailed { node });
        Ok(())
    }

    /// Last load notification reported for `node`
    #[must_use]
    pub fn load_outcome(&self, node: NodeId) -> Option<LoadOutcome> {
        self.inner.tree.read().nodes.get(&node).and_then(|e| e.load)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_attribute_name(name: &str) -> Result<(), DomError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(DomError::InvalidAttribute(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedItem;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_document_has_head_and_body() {
        let doc = Document::new();
        let root = doc.element(doc.root()).unwrap();
        assert_eq!(root.children(), &[doc.head(), doc.body()]);
        assert!(doc.is_connected(doc.body()));
    }

    #[test]
    fn detached_elements_are_not_connected() {
        let doc = Document::new();
        let div = doc.create_element(Tag::Div);
        assert!(!doc.is_connected(div));
        doc.append_child(doc.body(), div).unwrap();
        assert!(doc.is_connected(div));
    }

    #[test]
    fn append_rejects_cycles() {
        let doc = Document::new();
        let outer = doc.append_new(doc.body(), Tag::Div, &[]).unwrap();
        let inner = doc.append_new(outer, Tag::Div, &[]).unwrap();
        assert_eq!(
            doc.append_child(inner, outer),
            Err(DomError::HierarchyRequest {
                parent: inner,
                child: outer
            })
        );
        assert!(doc.append_child(outer, outer).is_err());
    }

    #[test]
    fn descendants_are_in_document_order() {
        let doc = Document::new();
        let a = doc.append_new(doc.body(), Tag::Div, &[]).unwrap();
        let a1 = doc.append_new(a, Tag::Img, &[]).unwrap();
        let a2 = doc.append_new(a, Tag::Img, &[]).unwrap();
        let b = doc.append_new(doc.body(), Tag::Div, &[]).unwrap();
        assert_eq!(doc.descendants(doc.body()), vec![doc.body(), a, a1, a2, b]);
    }

    #[test]
    fn attributes_and_classes() {
        let doc = Document::new();
        let img = doc.append_new(doc.body(), Tag::Img, &[("src", "/a.png")]).unwrap();
        assert_eq!(doc.attribute(img, "src").as_deref(), Some("/a.png"));

        doc.set_attribute(img, "loading", "lazy").unwrap();
        assert!(doc.has_attribute(img, "loading"));
        assert_eq!(doc.remove_attribute(img, "loading").unwrap().as_deref(), Some("lazy"));

        doc.add_class(img, "loaded").unwrap();
        assert!(doc.has_class(img, "loaded"));
        doc.remove_class(img, "loaded").unwrap();
        assert!(!doc.has_class(img, "loaded"));

        assert!(matches!(
            doc.set_attribute(img, "bad name", ""),
            Err(DomError::InvalidAttribute(_))
        ));
    }

    #[test]
    fn class_attribute_fills_the_class_list() {
        let doc = Document::new();
        let div = doc
            .append_new(doc.body(), Tag::Div, &[("class", "card  hero")])
            .unwrap();
        assert!(doc.has_class(div, "card"));
        assert!(doc.has_class(div, "hero"));
        assert!(!doc.has_attribute(div, "class"));

        doc.set_attribute(div, "class", "plain").unwrap();
        assert!(doc.has_class(div, "plain"));
        assert!(!doc.has_class(div, "card"));
    }

    #[test]
    fn connected_insertions_are_announced() {
        let doc = Document::new();
        let mut feed = doc.subscribe();

        let fragment = doc.create_element(Tag::Div);
        let img = doc.create_element(Tag::Img);
        doc.append_child(fragment, img).unwrap();
        assert!(feed.try_next().is_none(), "detached building is silent");

        doc.append_child(doc.body(), fragment).unwrap();
        match feed.try_next() {
            Some(FeedItem::Change(change)) => {
                assert_eq!(change.sequence, 1);
                assert_eq!(
                    change.event,
                    DomEvent::Inserted {
                        parent: doc.body(),
                        node: fragment
                    }
                );
            }
            other => panic!("unexpected feed item: {other:?}"),
        }
        assert_eq!(doc.last_sequence(), 1);
    }

    #[test]
    fn moving_an_element_announces_removal_then_insertion() {
        let doc = Document::new();
        let a = doc.append_new(doc.body(), Tag::Div, &[]).unwrap();
        let b = doc.append_new(doc.body(), Tag::Div, &[]).unwrap();
        let mut feed = doc.subscribe();

        doc.append_child(b, a).unwrap();

        let events: Vec<_> = std::iter::from_fn(|| feed.try_next())
            .filter_map(|item| match item {
                FeedItem::Change(c) => Some(c.event),
                FeedItem::Lagged { .. } => None,
            })
            .collect();
        assert_eq!(
            events,
            vec![
                DomEvent::Removed { node: a },
                DomEvent::Inserted { parent: b, node: a }
            ]
        );
    }

    #[test]
    fn load_notifications_require_known_nodes() {
        let doc = Document::new();
        let link = doc.append_new(doc.head(), Tag::Link, &[]).unwrap();
        assert!(doc.dispatch_load(link).is_ok());
        assert!(doc.dispatch_load(NodeId::new(9_999)).is_err());
    }

    #[test]
    fn load_outcomes_are_remembered() {
        let doc = Document::new();
        let sheet = doc.append_new(doc.head(), Tag::Link, &[]).unwrap();
        let script = doc.append_new(doc.body(), Tag::Script, &[]).unwrap();
        assert_eq!(doc.load_outcome(sheet), None);

        doc.dispatch_load(sheet).unwrap();
        doc.dispatch_load_failed(script).unwrap();

        assert_eq!(doc.load_outcome(sheet), Some(LoadOutcome::Loaded));
        assert_eq!(doc.element(script).unwrap().load_outcome(), Some(LoadOutcome::Failed));
    }

    #[test]
    fn removed_subtrees_are_forgotten() {
        let doc = Document::new();
        let section = doc.append_new(doc.body(), Tag::Div, &[]).unwrap();
        let img = doc.append_new(section, Tag::Img, &[]).unwrap();
        let mut feed = doc.subscribe();

        doc.remove(section).unwrap();

        assert!(matches!(
            feed.try_next(),
            Some(FeedItem::Change(Change { event: DomEvent::Removed { node }, .. })) if node == section
        ));
        assert_eq!(doc.element(img), None);
        assert_eq!(doc.set_attribute(img, "src", "/a.png"), Err(DomError::UnknownNode(img)));
        assert!(doc.element(doc.body()).unwrap().children().is_empty());
        assert!(doc.remove(doc.body()).is_err());
    }

    #[test]
    fn small_feed_reports_lag() {
        let doc = Document::with_feed_capacity(Viewport::default(), 2);
        let mut feed = doc.subscribe();
        for _ in 0..5 {
            doc.append_new(doc.body(), Tag::Div, &[]).unwrap();
        }
        assert!(matches!(feed.try_next(), Some(FeedItem::Lagged { skipped: 3 })));
    }
}
