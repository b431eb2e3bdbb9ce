//! Observing remediators: noop, printing, log-only, and counting.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use super::Remediator;
use crate::error::RemediationError;
use crate::logging::{LogLevel, log_at};
use crate::metrics::{CounterFactory, CounterHandle};
use crate::model::{DriftKind, Page, Title};

/// Does nothing. Used when a run should only observe, never repair.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRemediator;

impl Remediator for NoopRemediator {
    fn redirect_in_index(&mut self, _: &str, _: &Page, _: &str) -> Result<(), RemediationError> {
        Ok(())
    }

    fn page_not_in_index(&mut self, _: &Page) -> Result<(), RemediationError> {
        Ok(())
    }

    fn ghost_page_in_index(&mut self, _: &str, _: &Title) -> Result<(), RemediationError> {
        Ok(())
    }

    fn page_in_wrong_index(&mut self, _: &str, _: &Page, _: &str) -> Result<(), RemediationError> {
        Ok(())
    }

    fn old_version_in_index(
        &mut self,
        _: &str,
        _: &Page,
        _: &str,
    ) -> Result<(), RemediationError> {
        Ok(())
    }

    fn old_document(&mut self, _: &Page) -> Result<(), RemediationError> {
        Ok(())
    }
}

/// Writes a human-readable line per problem to `sink`, then delegates.
pub struct PrintingRemediator<R, W> {
    inner: R,
    sink: W,
}

impl<R: Remediator, W: Write> PrintingRemediator<R, W> {
    pub fn new(inner: R, sink: W) -> Self {
        Self { inner, sink }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.inner, self.sink)
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    fn print(
        &mut self,
        reason: &str,
        id: &str,
        title: &Title,
        suffix: Option<&str>,
    ) -> std::io::Result<()> {
        match suffix {
            Some(suffix) => writeln!(self.sink, "{reason:>30} {id:>10} {title} [{suffix}]"),
            None => writeln!(self.sink, "{reason:>30} {id:>10} {title}"),
        }
    }
}

impl<R: Remediator, W: Write> Remediator for PrintingRemediator<R, W> {
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.print(
            "Redirect in index",
            &page.id.to_string(),
            &page.title,
            Some(index_suffix),
        )?;
        self.inner.redirect_in_index(doc_id, page, index_suffix)
    }

    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.print("Page not in index", &page.id.to_string(), &page.title, None)?;
        self.inner.page_not_in_index(page)
    }

    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError> {
        self.print("Deleted page in index", doc_id, title, None)?;
        self.inner.ghost_page_in_index(doc_id, title)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.print(
            "Page in wrong index",
            &page.id.to_string(),
            &page.title,
            Some(index_suffix),
        )?;
        self.inner.page_in_wrong_index(doc_id, page, index_suffix)
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.print(
            "Outdated page in index",
            &page.id.to_string(),
            &page.title,
            Some(index_suffix),
        )?;
        self.inner.old_version_in_index(doc_id, page, index_suffix)
    }

    fn old_document(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.print("Old document", &page.id.to_string(), &page.title, None)?;
        self.inner.old_document(page)
    }
}

/// Logs each problem and does nothing else.
///
/// Meant for deployments that do not own the index writes but still want to
/// see the deviations. `old_document` is not logged: it fires for a fixed
/// share of every loop and says nothing about actual drift.
#[derive(Debug, Clone, Copy)]
pub struct LogOnlyRemediator {
    level: LogLevel,
}

impl LogOnlyRemediator {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl Default for LogOnlyRemediator {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Remediator for LogOnlyRemediator {
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        log_at!(
            self.level,
            doc = doc_id,
            page = page.id,
            index_suffix,
            title = %page.title,
            "LogOnlyRemediator::redirect_in_index"
        );
        Ok(())
    }

    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError> {
        log_at!(
            self.level,
            page = page.id,
            title = %page.title,
            "LogOnlyRemediator::page_not_in_index"
        );
        Ok(())
    }

    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError> {
        log_at!(
            self.level,
            doc = doc_id,
            title = %title,
            "LogOnlyRemediator::ghost_page_in_index"
        );
        Ok(())
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        log_at!(
            self.level,
            doc = doc_id,
            page = page.id,
            title = %page.title,
            index_suffix,
            "LogOnlyRemediator::page_in_wrong_index"
        );
        Ok(())
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        log_at!(
            self.level,
            doc = doc_id,
            page = page.id,
            title = %page.title,
            index_suffix,
            "LogOnlyRemediator::old_version_in_index"
        );
        Ok(())
    }

    fn old_document(&mut self, _page: &Page) -> Result<(), RemediationError> {
        Ok(())
    }
}

/// Counts problems by method name, then delegates.
///
/// Counters are created through the factory the first time a method fires
/// and reused afterwards.
pub struct CountingRemediator<R> {
    inner: R,
    factory: CounterFactory,
    counters: HashMap<DriftKind, Arc<dyn CounterHandle>>,
}

impl<R: Remediator> CountingRemediator<R> {
    pub fn new(inner: R, factory: CounterFactory) -> Self {
        Self {
            inner,
            factory,
            counters: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn increment(&mut self, kind: DriftKind) {
        let factory = &self.factory;
        self.counters
            .entry(kind)
            .or_insert_with(|| factory(kind.as_str()))
            .increment();
    }
}

impl<R: Remediator> Remediator for CountingRemediator<R> {
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.increment(DriftKind::RedirectInIndex);
        self.inner.redirect_in_index(doc_id, page, index_suffix)
    }

    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.increment(DriftKind::PageNotInIndex);
        self.inner.page_not_in_index(page)
    }

    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError> {
        self.increment(DriftKind::GhostPageInIndex);
        self.inner.ghost_page_in_index(doc_id, title)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.increment(DriftKind::PageInWrongIndex);
        self.inner.page_in_wrong_index(doc_id, page, index_suffix)
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.increment(DriftKind::OldVersionInIndex);
        self.inner.old_version_in_index(doc_id, page, index_suffix)
    }

    fn old_document(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.increment(DriftKind::OldDocument);
        self.inner.old_document(page)
    }
}
