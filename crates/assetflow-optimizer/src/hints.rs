//! Deduplicated `<head>` resource hints

use crate::record::AssetKind;
use assetflow_dom::{Document, DomError, Tag};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A `<link>` hint in the document head
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHint {
    /// Link relation, e.g. `preload`
    pub rel: String,
    /// Target URL
    pub url: String,
    /// Destination (`style`, `script`, `image`)
    #[serde(rename = "as")]
    pub destination: String,
}

impl ResourceHint {
    /// Preload hint for an asset
    #[must_use]
    pub fn preload(url: &str, kind: AssetKind) -> Self {
        Self {
            rel: "preload".to_string(),
            url: url.to_string(),
            destination: kind.preload_as().to_string(),
        }
    }
}

/// Hints keyed by `(rel, url)`
#[derive(Debug, Default)]
pub struct HintSet {
    seen: Mutex<HashSet<(String, String)>>,
    added: Mutex<Vec<ResourceHint>>,
}

impl HintSet {
    /// Create empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count links already in the head as present
    pub fn scan_existing(&self, document: &Document) {
        let head = document.head();
        let mut seen = self.seen.lock();
        for node in document.descendants(head) {
            let Some(element) = document.element(node) else {
                continue;
            };
            if element.tag() != &Tag::Link {
                continue;
            }
            if let (Some(rel), Some(href)) = (element.attribute("rel"), element.attribute("href")) {
                for rel in rel.split_ascii_whitespace() {
                    seen.insert((rel.to_ascii_lowercase(), href.to_string()));
                }
            }
        }
    }

    /// Append `hint` to the head unless its `(rel, url)` is already present
    ///
    /// # Errors
    /// [`DomError`] if the link cannot be created
    pub fn ensure(&self, document: &Document, hint: ResourceHint) -> Result<bool, DomError> {
        let key = (hint.rel.to_ascii_lowercase(), hint.url.clone());
        if !self.seen.lock().insert(key.clone()) {
            return Ok(false);
        }
        let appended = document.append_new(
            document.head(),
            Tag::Link,
            &[
                ("rel", hint.rel.as_str()),
                ("href", hint.url.as_str()),
                ("as", hint.destination.as_str()),
            ],
        );
        match appended {
            Ok(_) => {
                tracing::debug!(rel = %hint.rel, url = %hint.url, "resource hint added");
                self.added.lock().push(hint);
                Ok(true)
            }
            Err(err) => {
                self.seen.lock().remove(&key);
                Err(err)
            }
        }
    }

    /// Hints added by this set, in order
    #[must_use]
    pub fn added(&self) -> Vec<ResourceHint> {
        self.added.lock().clone()
    }
}
