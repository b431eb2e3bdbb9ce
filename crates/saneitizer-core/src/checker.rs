//! Drift detection: compare the authoritative store with one cluster's index.
//!
//! A [`Checker`] is bound to one cluster. For every page id of a batch it
//! looks up the page and the documents indexed under its id, decides which
//! kind of drift (if any) applies, and reports it through the remediator it
//! is handed. Store and index access go through the [`PageStore`] and
//! [`IndexReader`] seams so tests and the CLI can plug in their own backends.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CheckerError, StoreError};
use crate::index_layout::IndexLayout;
use crate::metrics::{
    CounterFactory, CounterHandle, CounterRegistry, LabeledCounter, SANITIZATION_COUNTER,
};
use crate::model::{DriftKind, IndexRecord, Page, PageId, Title};
use crate::remediator::{CountingRemediator, Remediator};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Read access to the authoritative page store.
pub trait PageStore: Send + Sync {
    /// Load the pages with the given ids. Ids with no page are simply absent.
    fn load_pages(&self, ids: &[PageId]) -> Result<Vec<Page>, StoreError>;

    /// Highest page id in the store, `None` when empty.
    fn max_page_id(&self) -> Result<Option<PageId>, StoreError>;
}

/// Read access to one cluster's search index.
pub trait IndexReader: Send + Sync {
    /// Name of the cluster this reader queries.
    fn cluster_name(&self) -> &str;

    /// Every document stored under any of `doc_ids`, across all indexes.
    fn fetch_records(&self, doc_ids: &[String]) -> Result<Vec<IndexRecord>, StoreError>;
}

// ---------------------------------------------------------------------------
// Page cache
// ---------------------------------------------------------------------------

/// Pages loaded during one batch, shared by the checkers of every cluster so
/// the store is read once per page. The owner clears it between batches.
#[derive(Debug, Default)]
pub struct PageCache {
    /// `None` marks an id that was looked up and has no usable page.
    pages: HashMap<PageId, Option<Page>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every id not already cached.
    ///
    /// Pages whose stored title is invalid are cached as missing; they need a
    /// dedicated cleanup and are never sanitized.
    pub fn load(&mut self, store: &dyn PageStore, ids: &[PageId]) -> Result<(), StoreError> {
        let missing: Vec<PageId> = ids
            .iter()
            .copied()
            .filter(|id| !self.pages.contains_key(id))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for id in &missing {
            self.pages.insert(*id, None);
        }
        for page in store.load_pages(&missing)? {
            if !page.title.is_valid() {
                tracing::debug!(
                    page = page.id,
                    title = %page.title,
                    "skipping page with invalid title"
                );
                continue;
            }
            self.pages.insert(page.id, Some(page));
        }
        Ok(())
    }

    pub fn get(&self, id: PageId) -> Option<&Page> {
        self.pages.get(&id).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.pages.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Checker options (`[checker]` section).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Emit a debug event for every page found sane.
    pub log_sane: bool,
    /// Trust the page table's redirect flag instead of loading content.
    /// Faster, but can disagree with the content.
    pub fast_redirect_check: bool,
}

/// Predicate deciding whether a sane page is due for re-derivation.
pub type IsOldFn = Arc<dyn Fn(&Page) -> bool + Send + Sync>;

/// Consider a page old once every `num_cycles` loops over the id space.
///
/// Every document is then rebuilt at least once per `num_cycles` loops.
/// `num_cycles == 0` never considers anything old.
pub fn make_is_old_fn(loop_id: u64, num_cycles: u64) -> IsOldFn {
    if num_cycles == 0 {
        return Arc::new(|_| false);
    }
    let loop_mod = loop_id % num_cycles;
    Arc::new(move |page: &Page| page.id % num_cycles == loop_mod)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Classification of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageVerdict {
    Classified { kind: DriftKind },
    /// An index record's name carries no recognizable suffix; nothing was emitted.
    MalformedIndex { index: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageOutcome {
    pub page_id: PageId,
    pub doc_id: String,
    pub verdict: PageVerdict,
}

impl PageOutcome {
    pub fn kind(&self) -> Option<DriftKind> {
        match self.verdict {
            PageVerdict::Classified { kind } => Some(kind),
            PageVerdict::MalformedIndex { .. } => None,
        }
    }
}

/// Result of checking one batch against one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub cluster: String,
    pub checked: usize,
    /// Pages that needed a fix (old documents excluded).
    pub fixed: usize,
    /// Sane pages scheduled for re-derivation.
    pub old: usize,
    pub outcomes: Vec<PageOutcome>,
}

impl CheckReport {
    pub fn malformed(&self) -> impl Iterator<Item = &PageOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.verdict, PageVerdict::MalformedIndex { .. }))
    }

    pub fn count(&self, kind: DriftKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind() == Some(kind)).count()
    }
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

/// Checks pages against the index of one cluster.
pub struct Checker {
    store: Arc<dyn PageStore>,
    index: Arc<dyn IndexReader>,
    layout: Arc<IndexLayout>,
    metrics: Arc<CounterRegistry>,
    config: CheckerConfig,
    is_old: IsOldFn,
}

impl Checker {
    pub fn new(
        store: Arc<dyn PageStore>,
        index: Arc<dyn IndexReader>,
        layout: Arc<IndexLayout>,
        metrics: Arc<CounterRegistry>,
    ) -> Self {
        Self {
            store,
            index,
            layout,
            metrics,
            config: CheckerConfig::default(),
            is_old: Arc::new(|_| false),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: CheckerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_is_old(mut self, is_old: IsOldFn) -> Self {
        self.is_old = is_old;
        self
    }

    pub fn cluster(&self) -> &str {
        self.index.cluster_name()
    }

    /// Check `page_ids`, reporting every problem to `remediator`.
    ///
    /// A malformed index name fails only that page's classification and is
    /// reported in the returned outcomes. Store, index, and remediation
    /// failures abort the batch.
    pub fn check<R: Remediator + ?Sized>(
        &self,
        page_ids: &[PageId],
        cache: &mut PageCache,
        remediator: &mut R,
    ) -> Result<CheckReport, CheckerError> {
        // Each page is classified once however often it is listed.
        let mut seen = HashSet::with_capacity(page_ids.len());
        let page_ids: Vec<PageId> = page_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        let doc_ids: Vec<String> = page_ids
            .iter()
            .map(|id| self.layout.make_doc_id(*id))
            .collect();

        cache
            .load(self.store.as_ref(), &page_ids)
            .map_err(CheckerError::PageStore)?;
        let mut from_index = self.load_from_index(&doc_ids)?;

        let mut remediator = CountingRemediator::new(remediator, self.fixed_counter_factory());
        let mut report = CheckReport {
            cluster: self.cluster().to_string(),
            checked: page_ids.len(),
            ..CheckReport::default()
        };

        for (page_id, doc_id) in page_ids.into_iter().zip(doc_ids) {
            let records = from_index.remove(&doc_id).unwrap_or_default();
            let verdict = match cache.get(page_id) {
                Some(page) => self.check_existing_page(&doc_id, page, &records, &mut remediator)?,
                None => self.check_inexistent_page(&doc_id, page_id, &records, &mut remediator)?,
            };
            if let PageVerdict::Classified { kind } = verdict {
                match kind {
                    DriftKind::Sane => {}
                    DriftKind::OldDocument => report.old += 1,
                    _ => report.fixed += 1,
                }
            }
            report.outcomes.push(PageOutcome {
                page_id,
                doc_id,
                verdict,
            });
        }

        self.counter("checked", "n/a").add(report.checked as u64);
        self.counter("old", "n/a").add(report.old as u64);
        tracing::debug!(
            cluster = %report.cluster,
            checked = report.checked,
            fixed = report.fixed,
            old = report.old,
            malformed = report.malformed().count(),
            "checked batch"
        );
        Ok(report)
    }

    fn check_existing_page<R: Remediator>(
        &self,
        doc_id: &str,
        page: &Page,
        records: &[IndexRecord],
        remediator: &mut R,
    ) -> Result<PageVerdict, CheckerError> {
        // Parse every suffix up front so a bad name emits nothing for this page.
        let mut suffixes = Vec::with_capacity(records.len());
        for record in records {
            match self.layout.extract_index_suffix(&record.index) {
                Ok(suffix) => suffixes.push(suffix),
                Err(CheckerError::MalformedIndexName { name }) => {
                    tracing::warn!(page = page.id, index = %name, "cannot parse index name");
                    return Ok(PageVerdict::MalformedIndex { index: name });
                }
                Err(e) => return Err(e),
            }
        }

        let kind = self.classify_existing(doc_id, page, records, &suffixes, remediator)?;
        if kind.is_sane() && (self.is_old)(page) {
            remediator.old_document(page)?;
            return Ok(PageVerdict::Classified {
                kind: DriftKind::OldDocument,
            });
        }
        Ok(PageVerdict::Classified { kind })
    }

    fn classify_existing<R: Remediator>(
        &self,
        doc_id: &str,
        page: &Page,
        records: &[IndexRecord],
        suffixes: &[String],
        remediator: &mut R,
    ) -> Result<DriftKind, CheckerError> {
        if self.is_redirect(page) {
            if suffixes.is_empty() {
                self.sane(page.id, "Redirect not in index");
                return Ok(DriftKind::Sane);
            }
            for suffix in suffixes {
                remediator.redirect_in_index(doc_id, page, suffix)?;
            }
            return Ok(DriftKind::RedirectInIndex);
        }

        if records.is_empty() {
            remediator.page_not_in_index(page)?;
            return Ok(DriftKind::PageNotInIndex);
        }

        let expected = self.layout.suffix_for_namespace(page.title.namespace);
        let mut wrong_index = false;
        for suffix in suffixes.iter().filter(|s| s.as_str() != expected) {
            remediator.page_in_wrong_index(doc_id, page, suffix)?;
            wrong_index = true;
        }
        if wrong_index {
            return Ok(DriftKind::PageInWrongIndex);
        }

        let mut outdated = false;
        for (record, suffix) in records.iter().zip(suffixes) {
            if record.version.is_none_or(|v| v < page.latest_revision) {
                remediator.old_version_in_index(doc_id, page, suffix)?;
                outdated = true;
            }
        }
        if outdated {
            return Ok(DriftKind::OldVersionInIndex);
        }

        self.sane(page.id, "Page in index with latest version");
        Ok(DriftKind::Sane)
    }

    fn check_inexistent_page<R: Remediator>(
        &self,
        doc_id: &str,
        page_id: PageId,
        records: &[IndexRecord],
        remediator: &mut R,
    ) -> Result<PageVerdict, CheckerError> {
        if records.is_empty() {
            self.sane(page_id, "No ghost");
            return Ok(PageVerdict::Classified {
                kind: DriftKind::Sane,
            });
        }
        for record in records {
            let title =
                Title::new_safe(record.namespace, &record.title).unwrap_or_else(Title::bad_title);
            remediator.ghost_page_in_index(doc_id, &title)?;
        }
        Ok(PageVerdict::Classified {
            kind: DriftKind::GhostPageInIndex,
        })
    }

    fn is_redirect(&self, page: &Page) -> bool {
        if self.config.fast_redirect_check {
            page.is_redirect
        } else {
            page.content_redirect.unwrap_or(false)
        }
    }

    fn load_from_index(
        &self,
        doc_ids: &[String],
    ) -> Result<BTreeMap<String, Vec<IndexRecord>>, CheckerError> {
        let records = self
            .index
            .fetch_records(doc_ids)
            .map_err(CheckerError::Index)?;
        let mut by_doc: BTreeMap<String, Vec<IndexRecord>> = BTreeMap::new();
        for record in records {
            by_doc.entry(record.doc_id.clone()).or_default().push(record);
        }
        Ok(by_doc)
    }

    fn sane(&self, page_id: PageId, reason: &str) {
        if self.config.log_sane {
            tracing::debug!(page = page_id, cluster = %self.cluster(), reason, "sane");
        }
    }

    fn counter(&self, action: &str, problem: &str) -> Arc<LabeledCounter> {
        self.metrics.counter(
            SANITIZATION_COUNTER,
            &[
                ("problem", problem),
                ("search_cluster", self.cluster()),
                ("action", action),
            ],
        )
    }

    fn fixed_counter_factory(&self) -> CounterFactory {
        let metrics = Arc::clone(&self.metrics);
        let cluster = self.cluster().to_string();
        Arc::new(move |problem: &str| -> Arc<dyn CounterHandle> {
            metrics.counter(
                SANITIZATION_COUNTER,
                &[
                    ("problem", problem),
                    ("search_cluster", cluster.as_str()),
                    ("action", "fixed"),
                ],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_layout::IndexLayoutConfig;
    use crate::remediator::Action;
    use crate::remediator::testing::SpyRemediator;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockStore {
        pages: Vec<Page>,
        calls: Mutex<Vec<Vec<PageId>>>,
        fail: bool,
    }

    impl PageStore for MockStore {
        fn load_pages(&self, ids: &[PageId]) -> Result<Vec<Page>, StoreError> {
            if self.fail {
                return Err(StoreError::Unavailable {
                    backend: "db".to_string(),
                    reason: "down".to_string(),
                });
            }
            self.calls.lock().push(ids.to_vec());
            Ok(self
                .pages
                .iter()
                .filter(|p| ids.contains(&p.id))
                .cloned()
                .collect())
        }

        fn max_page_id(&self) -> Result<Option<PageId>, StoreError> {
            Ok(self.pages.iter().map(|p| p.id).max())
        }
    }

    #[derive(Default)]
    struct MockIndex {
        records: Vec<IndexRecord>,
        fail: bool,
    }

    impl IndexReader for MockIndex {
        fn cluster_name(&self) -> &str {
            "c1"
        }

        fn fetch_records(&self, doc_ids: &[String]) -> Result<Vec<IndexRecord>, StoreError> {
            if self.fail {
                return Err(StoreError::InvalidResponse {
                    backend: "c1".to_string(),
                    reason: "timeout".to_string(),
                });
            }
            Ok(self
                .records
                .iter()
                .filter(|r| doc_ids.contains(&r.doc_id))
                .cloned()
                .collect())
        }
    }

    fn record(id: PageId, index: &str, version: Option<u64>) -> IndexRecord {
        IndexRecord {
            doc_id: id.to_string(),
            index: index.to_string(),
            namespace: 0,
            title: format!("Page {id}"),
            version,
        }
    }

    fn page(id: PageId) -> Page {
        Page::new(id, Title::new(0, format!("Page {id}")), 10)
    }

    struct Fixture {
        store: MockStore,
        index: MockIndex,
        config: CheckerConfig,
        is_old: Option<IsOldFn>,
    }

    impl Fixture {
        fn new(pages: Vec<Page>, records: Vec<IndexRecord>) -> Self {
            Self {
                store: MockStore {
                    pages,
                    ..MockStore::default()
                },
                index: MockIndex {
                    records,
                    fail: false,
                },
                config: CheckerConfig::default(),
                is_old: None,
            }
        }

        fn run(
            self,
            ids: &[PageId],
        ) -> (
            Result<CheckReport, CheckerError>,
            SpyRemediator,
            Arc<CounterRegistry>,
        ) {
            let metrics = Arc::new(CounterRegistry::new());
            let layout = Arc::new(IndexLayout::new(IndexLayoutConfig::default()).unwrap());
            let mut checker = Checker::new(
                Arc::new(self.store),
                Arc::new(self.index),
                layout,
                Arc::clone(&metrics),
            )
            .with_config(self.config);
            if let Some(is_old) = self.is_old {
                checker = checker.with_is_old(is_old);
            }
            let mut spy = SpyRemediator::default();
            let result = checker.check(ids, &mut PageCache::new(), &mut spy);
            (result, spy, metrics)
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    #[test]
    fn sane_page_emits_nothing() {
        let (report, spy, _) = Fixture::new(
            vec![page(1)],
            vec![record(1, "wiki_content_123", Some(10))],
        )
        .run(&[1]);
        let report = report.unwrap();
        assert!(spy.calls.is_empty());
        assert_eq!(report.count(DriftKind::Sane), 1);
        assert_eq!(report.fixed, 0);
    }

    #[test]
    fn repeated_page_id_is_checked_once() {
        let (report, spy, _) = Fixture::new(
            vec![page(1)],
            vec![record(1, "wiki_content_123", Some(10))],
        )
        .run(&[1, 1]);
        let report = report.unwrap();
        assert!(spy.calls.is_empty());
        assert_eq!(report.checked, 1);
        assert_eq!(report.fixed, 0);
        assert_eq!(report.outcomes.len(), 1);
    }

    #[test]
    fn missing_page_not_in_index_is_sane() {
        let (report, spy, _) = Fixture::new(vec![], vec![]).run(&[5]);
        assert!(spy.calls.is_empty());
        assert_eq!(report.unwrap().count(DriftKind::Sane), 1);
    }

    #[test]
    fn ghost_reported_per_record() {
        let mut bad = record(9, "wiki_general_1", None);
        bad.title = "Bad|Title".to_string();
        let (report, spy, _) =
            Fixture::new(vec![], vec![record(9, "wiki_content_1", Some(3)), bad]).run(&[9]);
        assert_eq!(report.unwrap().fixed, 1);
        assert_eq!(
            spy.calls,
            vec![
                Action::GhostPageInIndex {
                    doc_id: "9".to_string(),
                    title: Title::new(0, "Page 9"),
                },
                Action::GhostPageInIndex {
                    doc_id: "9".to_string(),
                    title: Title::bad_title(),
                },
            ]
        );
    }

    #[test]
    fn redirect_in_index_reported_per_record() {
        let redirect = page(2).into_redirect();
        let (report, spy, _) = Fixture::new(
            vec![redirect.clone()],
            vec![
                record(2, "wiki_content_1", Some(10)),
                record(2, "wiki_general_1", Some(10)),
            ],
        )
        .run(&[2]);
        assert_eq!(report.unwrap().count(DriftKind::RedirectInIndex), 1);
        assert_eq!(
            spy.calls,
            vec![
                Action::RedirectInIndex {
                    doc_id: "2".to_string(),
                    page: redirect.clone(),
                    index_suffix: "content".to_string(),
                },
                Action::RedirectInIndex {
                    doc_id: "2".to_string(),
                    page: redirect,
                    index_suffix: "general".to_string(),
                },
            ]
        );
    }

    #[test]
    fn redirect_not_in_index_is_sane() {
        let (report, spy, _) = Fixture::new(vec![page(2).into_redirect()], vec![]).run(&[2]);
        assert!(spy.calls.is_empty());
        assert_eq!(report.unwrap().count(DriftKind::Sane), 1);
    }

    #[test]
    fn redirect_check_mode_selects_flag() {
        let mut p = page(2);
        p.is_redirect = true;
        p.content_redirect = Some(false);
        let records = vec![record(2, "wiki_content_1", Some(10))];

        let (_, spy, _) = Fixture::new(vec![p.clone()], records.clone()).run(&[2]);
        assert!(spy.calls.is_empty());

        let mut fixture = Fixture::new(vec![p], records);
        fixture.config.fast_redirect_check = true;
        let (_, spy, _) = fixture.run(&[2]);
        assert_eq!(spy.kinds(), vec![DriftKind::RedirectInIndex]);
    }

    #[test]
    fn missing_content_is_not_a_redirect() {
        let mut p = page(2);
        p.is_redirect = true;
        p.content_redirect = None;
        let (_, spy, _) = Fixture::new(vec![p], vec![]).run(&[2]);
        assert_eq!(spy.kinds(), vec![DriftKind::PageNotInIndex]);
    }

    #[test]
    fn page_not_in_index() {
        let (report, spy, _) = Fixture::new(vec![page(3)], vec![]).run(&[3]);
        assert_eq!(
            spy.calls,
            vec![Action::PageNotInIndex { page: page(3) }]
        );
        assert_eq!(report.unwrap().fixed, 1);
    }

    #[test]
    fn wrong_index_reported_for_mismatched_records_only() {
        let (report, spy, _) = Fixture::new(
            vec![page(4)],
            vec![
                record(4, "wiki_content_1", Some(1)),
                record(4, "wiki_general_1", Some(1)),
            ],
        )
        .run(&[4]);
        assert_eq!(report.unwrap().count(DriftKind::PageInWrongIndex), 1);
        assert_eq!(
            spy.calls,
            vec![Action::PageInWrongIndex {
                doc_id: "4".to_string(),
                page: page(4),
                index_suffix: "general".to_string(),
            }]
        );
    }

    #[test]
    fn outdated_or_unversioned_records_are_old_versions() {
        let (report, spy, _) = Fixture::new(
            vec![page(5), page(6)],
            vec![
                record(5, "wiki_content_1", Some(9)),
                record(6, "wiki_content_1", None),
            ],
        )
        .run(&[5, 6]);
        assert_eq!(report.unwrap().count(DriftKind::OldVersionInIndex), 2);
        assert_eq!(
            spy.kinds(),
            vec![DriftKind::OldVersionInIndex, DriftKind::OldVersionInIndex]
        );
    }

    #[test]
    fn newer_indexed_version_is_sane() {
        let (_, spy, _) =
            Fixture::new(vec![page(5)], vec![record(5, "wiki_content_1", Some(11))]).run(&[5]);
        assert!(spy.calls.is_empty());
    }

    #[test]
    fn old_document_only_for_otherwise_sane_pages() {
        let mut fixture = Fixture::new(
            vec![page(1), page(2)],
            vec![record(1, "wiki_content_1", Some(10))],
        );
        fixture.is_old = Some(Arc::new(|_| true));
        let (report, spy, _) = fixture.run(&[1, 2]);
        let report = report.unwrap();
        assert_eq!(
            spy.kinds(),
            vec![DriftKind::OldDocument, DriftKind::PageNotInIndex]
        );
        assert_eq!(report.old, 1);
        assert_eq!(report.fixed, 1);
    }

    #[test]
    fn malformed_index_name_emits_nothing_for_that_page() {
        let (report, spy, _) = Fixture::new(
            vec![page(1), page(2)],
            vec![
                record(1, "wiki_content_1", Some(1)),
                record(1, "garbage", Some(1)),
                record(2, "wiki_content_1", Some(1)),
            ],
        )
        .run(&[1, 2]);
        let report = report.unwrap();
        assert_eq!(
            report.outcomes[0].verdict,
            PageVerdict::MalformedIndex {
                index: "garbage".to_string()
            }
        );
        assert_eq!(report.malformed().count(), 1);
        assert_eq!(spy.kinds(), vec![DriftKind::OldVersionInIndex]);
        assert_eq!(spy.calls.len(), 1);
    }

    #[test]
    fn invalid_store_titles_are_treated_as_absent() {
        let broken = Page::new(7, Title::new(0, "Bad{Title}"), 10);
        let (report, spy, _) =
            Fixture::new(vec![broken], vec![record(7, "wiki_content_1", Some(10))]).run(&[7]);
        assert_eq!(report.unwrap().count(DriftKind::GhostPageInIndex), 1);
        assert_eq!(spy.kinds(), vec![DriftKind::GhostPageInIndex]);
    }

    // =========================================================================
    // Failures, cache, metrics
    // =========================================================================

    #[test]
    fn store_and_index_failures_abort() {
        let mut fixture = Fixture::new(vec![page(1)], vec![]);
        fixture.store.fail = true;
        let (result, _, _) = fixture.run(&[1]);
        assert!(matches!(result, Err(CheckerError::PageStore(_))));

        let mut fixture = Fixture::new(vec![page(1)], vec![]);
        fixture.index.fail = true;
        let (result, _, _) = fixture.run(&[1]);
        assert!(matches!(result, Err(CheckerError::Index(_))));
    }

    #[test]
    fn remediation_failure_propagates() {
        let metrics = Arc::new(CounterRegistry::new());
        let checker = Checker::new(
            Arc::new(MockStore {
                pages: vec![page(1)],
                ..MockStore::default()
            }),
            Arc::new(MockIndex::default()),
            Arc::new(IndexLayout::new(IndexLayoutConfig::default()).unwrap()),
            metrics,
        );
        let mut spy = SpyRemediator {
            fail_with: Some(crate::error::TransportError::Closed),
            ..SpyRemediator::default()
        };
        let err = checker
            .check(&[1], &mut PageCache::new(), &mut spy)
            .unwrap_err();
        assert!(matches!(err, CheckerError::Remediation(_)));
    }

    #[test]
    fn shared_cache_reads_store_once_per_page() {
        let store = Arc::new(MockStore {
            pages: vec![page(1), page(2)],
            ..MockStore::default()
        });
        let layout = Arc::new(IndexLayout::new(IndexLayoutConfig::default()).unwrap());
        let metrics = Arc::new(CounterRegistry::new());
        let checker = Checker::new(
            Arc::clone(&store) as Arc<dyn PageStore>,
            Arc::new(MockIndex::default()),
            layout,
            metrics,
        );
        let mut cache = PageCache::new();
        let mut spy = SpyRemediator::default();
        checker.check(&[1, 2, 3], &mut cache, &mut spy).unwrap();
        checker.check(&[1, 2, 3], &mut cache, &mut spy).unwrap();
        assert_eq!(store.calls.lock().len(), 1);
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(3));
        assert!(cache.get(3).is_none());

        cache.clear();
        checker.check(&[1], &mut cache, &mut spy).unwrap();
        assert_eq!(store.calls.lock().len(), 2);
    }

    #[test]
    fn counters_are_labeled_by_cluster_action_and_problem() {
        let mut fixture = Fixture::new(
            vec![page(1), page(2), page(3)],
            vec![record(1, "wiki_content_1", Some(10))],
        );
        fixture.is_old = Some(make_is_old_fn(1, 2));
        let (report, _, metrics) = fixture.run(&[1, 2, 3]);
        report.unwrap();

        let fixed = |problem: &str| {
            metrics.value(
                SANITIZATION_COUNTER,
                &[
                    ("problem", problem),
                    ("search_cluster", "c1"),
                    ("action", "fixed"),
                ],
            )
        };
        assert_eq!(fixed("page_not_in_index"), 2);
        assert_eq!(fixed("old_document"), 1);
        assert_eq!(
            metrics.value(
                SANITIZATION_COUNTER,
                &[("problem", "n/a"), ("search_cluster", "c1"), ("action", "checked")],
            ),
            3
        );
        assert_eq!(
            metrics.sum(SANITIZATION_COUNTER, &[("action", "old")]),
            1
        );
    }

    #[test]
    fn is_old_fn_cycles_through_ids() {
        let is_old = make_is_old_fn(7, 3);
        let old: Vec<PageId> = (1..=9).filter(|id| is_old(&page(*id))).collect();
        assert_eq!(old, vec![1, 4, 7]);

        let never = make_is_old_fn(7, 0);
        assert!(!(1..=9).any(|id| never(&page(id))));
    }
}
