//! File-backed store and indexes.
//!
//! A snapshot is one JSON document holding the authoritative pages and the
//! records of every cluster's index:
//!
//! ```json
//! {
//!   "pages": [
//!     {"id": 1, "title": {"namespace": 0, "text": "Main"}, "latest_revision": 7,
//!      "content_redirect": false}
//!   ],
//!   "clusters": {
//!     "eqiad": [
//!       {"doc_id": "1", "index": "enwiki_content_1", "namespace": 0,
//!        "title": "Main", "version": 7}
//!     ]
//!   }
//! }
//! ```
//!
//! It lets the CLI check an exported dump offline and gives tests a backend
//! with no moving parts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::checker::{IndexReader, PageStore};
use crate::error::StoreError;
use crate::model::{IndexRecord, Page, PageId};

const BACKEND: &str = "snapshot";

/// Serialized form of a snapshot file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub pages: Vec<Page>,
    /// Index records keyed by cluster name.
    #[serde(default)]
    pub clusters: BTreeMap<String, Vec<IndexRecord>>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let data = std::fs::read_to_string(path).map_err(|e| StoreError::Unavailable {
            backend: BACKEND.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, StoreError> {
        serde_json::from_str(data).map_err(|e| StoreError::InvalidResponse {
            backend: BACKEND.to_string(),
            reason: e.to_string(),
        })
    }

    /// Split into a page store and one index reader per cluster.
    pub fn into_backends(self) -> (Arc<SnapshotStore>, BTreeMap<String, Arc<SnapshotIndex>>) {
        let store = Arc::new(SnapshotStore::new(self.pages));
        let indexes = self
            .clusters
            .into_iter()
            .map(|(cluster, records)| {
                let index = Arc::new(SnapshotIndex::new(cluster.clone(), records));
                (cluster, index)
            })
            .collect();
        (store, indexes)
    }
}

/// In-memory [`PageStore`] keyed by page id.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    pages: HashMap<PageId, Page>,
}

impl SnapshotStore {
    /// Later duplicates of an id replace earlier ones.
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            pages: pages.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl PageStore for SnapshotStore {
    fn load_pages(&self, ids: &[PageId]) -> Result<Vec<Page>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.pages.get(id))
            .cloned()
            .collect())
    }

    fn max_page_id(&self) -> Result<Option<PageId>, StoreError> {
        Ok(self.pages.keys().copied().max())
    }
}

/// In-memory [`IndexReader`] for one cluster.
#[derive(Debug)]
pub struct SnapshotIndex {
    cluster: String,
    by_doc: HashMap<String, Vec<IndexRecord>>,
}

impl SnapshotIndex {
    pub fn new(cluster: impl Into<String>, records: Vec<IndexRecord>) -> Self {
        let mut by_doc: HashMap<String, Vec<IndexRecord>> = HashMap::new();
        for record in records {
            by_doc.entry(record.doc_id.clone()).or_default().push(record);
        }
        Self {
            cluster: cluster.into(),
            by_doc,
        }
    }
}

impl IndexReader for SnapshotIndex {
    fn cluster_name(&self) -> &str {
        &self.cluster
    }

    fn fetch_records(&self, doc_ids: &[String]) -> Result<Vec<IndexRecord>, StoreError> {
        let mut seen = HashSet::new();
        Ok(doc_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| self.by_doc.get(id))
            .flatten()
            .cloned()
            .collect())
    }
}
