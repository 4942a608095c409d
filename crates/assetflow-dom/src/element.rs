//! Element identities, tags and per-element state

use crate::geometry::Rect;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Stable identity of an element inside one [`Document`](crate::Document)
///
/// Ids are never reused for the lifetime of the document, so a detached and
/// re-inserted element keeps its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element tag
///
/// Only the tags the pipeline cares about get their own variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `<html>`
    Html,
    /// `<head>`
    Head,
    /// `<body>`
    Body,
    /// `<link>`
    Link,
    /// `<script>`
    Script,
    /// `<img>`
    Img,
    /// `<div>`
    Div,
    /// Any other element
    Other(String),
}

impl Tag {
    /// Parse a tag name (case-insensitive)
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "html" => Self::Html,
            "head" => Self::Head,
            "body" => Self::Body,
            "link" => Self::Link,
            "script" => Self::Script,
            "img" => Self::Img,
            "div" => Self::Div,
            other => Self::Other(other.to_string()),
        }
    }

    /// Lowercase tag name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Html => "html",
            Self::Head => "head",
            Self::Body => "body",
            Self::Link => "link",
            Self::Script => "script",
            Self::Img => "img",
            Self::Div => "div",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Tag {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last load notification the host reported for an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadOutcome {
    /// The resource loaded
    Loaded,
    /// The resource failed to load
    Failed,
}

/// Snapshot of one element
///
/// Handed out by value from [`Document::element`](crate::Document::element);
/// mutating a snapshot does not touch the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub(crate) tag: Tag,
    pub(crate) attributes: IndexMap<String, String>,
    pub(crate) classes: IndexSet<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    pub(crate) bounds: Option<Rect>,
    pub(crate) load: Option<LoadOutcome>,
}

impl Element {
    pub(crate) fn new(tag: Tag) -> Self {
        Self {
            tag,
            attributes: IndexMap::new(),
            classes: IndexSet::new(),
            parent: None,
            children: SmallVec::new(),
            bounds: None,
            load: None,
        }
    }

    /// Store an attribute; `class` replaces the class list instead
    pub(crate) fn put_attribute(&mut self, name: &str, value: String) {
        if name == "class" {
            self.classes = value.split_ascii_whitespace().map(str::to_string).collect();
        } else {
            self.attributes.insert(name.to_string(), value);
        }
    }

    /// Element tag
    #[inline]
    #[must_use]
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Attribute value, if set
    #[inline]
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Whether the attribute is present (boolean attributes carry an empty value)
    #[inline]
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Attributes in insertion order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the class list contains `class`
    #[inline]
    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    /// Child elements in order
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Layout box reported by the host
    #[inline]
    #[must_use]
    pub fn bounds(&self) -> Option<Rect> {
        self.bounds
    }

    /// Last load notification, if any
    #[inline]
    #[must_use]
    pub fn load_outcome(&self) -> Option<LoadOutcome> {
        self.load
    }
}
