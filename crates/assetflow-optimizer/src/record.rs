//! Asset records and the per-URL table

use crate::error::OptimizeError;
use assetflow_dom::NodeId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of resource behind an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// `<link rel="stylesheet">`
    Stylesheet,
    /// `<script src>`
    Script,
    /// `<img>`
    Image,
}

impl AssetKind {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
            Self::Image => "image",
        }
    }

    /// `as` value of a preload hint
    #[must_use]
    pub const fn preload_as(self) -> &'static str {
        match self {
            Self::Stylesheet => "style",
            Self::Script => "script",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an asset is needed for the first render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Needed for the first render
    Critical,
    /// Can wait
    NonCritical,
}

impl Classification {
    /// Whether this is [`Classification::Critical`]
    #[inline]
    #[must_use]
    pub fn is_critical(self) -> bool {
        self == Self::Critical
    }

    /// Lowercase name, as serialized
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::NonCritical => "non-critical",
        }
    }
}

/// Optimization progress; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    /// Recorded, not yet claimed
    Pending,
    /// Claimed by exactly one optimization
    Optimizing,
    /// Rewritten
    Optimized,
    /// Optimization failed; left as found
    Error,
}

impl AssetStatus {
    /// `Optimized` or `Error`
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Optimized | Self::Error)
    }

    fn can_advance_to(self, to: AssetStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Optimizing) | (Self::Optimizing, Self::Optimized | Self::Error)
        )
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Optimizing => "optimizing",
            Self::Optimized => "optimized",
            Self::Error => "error",
        })
    }
}

/// One distinct resource URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Resource URL, the record's identity
    pub url: String,
    /// Resource kind
    pub kind: AssetKind,
    /// Fixed at discovery
    pub classification: Classification,
    /// Progress
    pub status: AssetStatus,
    /// Element the URL was first seen on
    pub node: NodeId,
    /// Failure detail when `status` is `Error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Discovery order
    pub discovered: u64,
}

/// Record counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetStats {
    /// Recorded, not claimed
    pub pending: usize,
    /// Being optimized
    pub optimizing: usize,
    /// Done
    pub optimized: usize,
    /// Failed
    pub error: usize,
}

impl AssetStats {
    /// All records
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.optimizing + self.optimized + self.error
    }
}

/// Per-URL records; the optimizer's idempotency gate
#[derive(Debug, Default)]
pub struct AssetTable {
    records: DashMap<String, AssetRecord>,
    discovered: AtomicU64,
}

impl AssetTable {
    /// Create empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `url` and claim it for optimization
    ///
    /// Creates the record `pending`, classifies it and moves it to
    /// `optimizing` while holding the entry, so exactly one caller per URL
    /// gets `Some`. Later callers get `None`.
    pub fn claim(
        &self,
        url: &str,
        kind: AssetKind,
        node: NodeId,
        classify: impl FnOnce() -> Classification,
    ) -> Option<Classification> {
        match self.records.entry(url.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let mut record = AssetRecord {
                    url: url.to_string(),
                    kind,
                    classification: classify(),
                    status: AssetStatus::Pending,
                    node,
                    error: None,
                    discovered: self.discovered.fetch_add(1, Ordering::Relaxed),
                };
                record.status = AssetStatus::Optimizing;
                let classification = record.classification;
                slot.insert(record);
                Some(classification)
            }
        }
    }

    /// Move `url` forward to `to`
    ///
    /// # Errors
    /// - [`OptimizeError::UnknownAsset`] without a record
    /// - [`OptimizeError::IllegalStatus`] for backwards or terminal moves
    pub fn advance(&self, url: &str, to: AssetStatus) -> Result<(), OptimizeError> {
        let mut record = self
            .records
            .get_mut(url)
            .ok_or_else(|| OptimizeError::UnknownAsset(url.to_string()))?;
        if !record.status.can_advance_to(to) {
            return Err(OptimizeError::IllegalStatus {
                url: url.to_string(),
                from: record.status,
                to,
            });
        }
        record.status = to;
        Ok(())
    }

    /// Mark `url` as failed with `message`
    ///
    /// # Errors
    /// As [`AssetTable::advance`]
    pub fn fail(&self, url: &str, message: impl Into<String>) -> Result<(), OptimizeError> {
        self.advance(url, AssetStatus::Error)?;
        if let Some(mut record) = self.records.get_mut(url) {
            record.error = Some(message.into());
        }
        Ok(())
    }

    /// Snapshot of one record
    #[must_use]
    pub fn get(&self, url: &str) -> Option<AssetRecord> {
        self.records.get(url).map(|record| record.clone())
    }

    /// Snapshot of all records in discovery order
    #[must_use]
    pub fn records(&self) -> Vec<AssetRecord> {
        let mut records: Vec<AssetRecord> = self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by_key(|record| record.discovered);
        records
    }

    /// Counts per status
    #[must_use]
    pub fn stats(&self) -> AssetStats {
        let mut stats = AssetStats::default();
        for entry in &self.records {
            match entry.status {
                AssetStatus::Pending => stats.pending += 1,
                AssetStatus::Optimizing => stats.optimizing += 1,
                AssetStatus::Optimized => stats.optimized += 1,
                AssetStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no URL has been seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn node() -> NodeId {
        assetflow_dom::Document::new().body()
    }

    #[test]
    fn first_claim_wins() {
        let table = AssetTable::new();
        let body = node();
        assert_eq!(
            table.claim("/main.css", AssetKind::Stylesheet, body, || Classification::Critical),
            Some(Classification::Critical)
        );
        assert_eq!(
            table.claim("/main.css", AssetKind::Stylesheet, body, || unreachable!()),
            None
        );
        assert_eq!(table.get("/main.css").unwrap().status, AssetStatus::Optimizing);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn concurrent_claims_produce_one_record() {
        let table = Arc::new(AssetTable::new());
        let body = node();
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let table = Arc::clone(&table);
                    scope.spawn(move || {
                        usize::from(
                            table
                                .claim("/app.js", AssetKind::Script, body, || Classification::NonCritical)
                                .is_some(),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn status_is_monotonic() {
        let table = AssetTable::new();
        table.claim("/a.js", AssetKind::Script, node(), || Classification::NonCritical);
        table.advance("/a.js", AssetStatus::Optimized).unwrap();
        assert!(matches!(
            table.advance("/a.js", AssetStatus::Optimizing),
            Err(OptimizeError::IllegalStatus { .. })
        ));
        assert!(table.fail("/a.js", "late").is_err());
        assert!(matches!(
            table.advance("/nope.js", AssetStatus::Optimized),
            Err(OptimizeError::UnknownAsset(_))
        ));
    }

    #[test]
    fn errors_are_terminal_and_kept() {
        let table = AssetTable::new();
        table.claim("/a.css", AssetKind::Stylesheet, node(), || Classification::NonCritical);
        table.fail("/a.css", "element removed").unwrap();
        let record = table.get("/a.css").unwrap();
        assert_eq!(record.status, AssetStatus::Error);
        assert_eq!(record.error.as_deref(), Some("element removed"));
        assert!(table.advance("/a.css", AssetStatus::Optimized).is_err());
        assert_eq!(table.stats().error, 1);
    }

    #[test]
    fn records_keep_discovery_order() {
        let table = AssetTable::new();
        for url in ["/z.js", "/a.js", "/m.js"] {
            table.claim(url, AssetKind::Script, node(), || Classification::NonCritical);
        }
        let urls: Vec<String> = table.records().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["/z.js", "/a.js", "/m.js"]);
    }
}
