//! Remediation capability: what to do about each kind of index drift.
//!
//! The checker reports every problem it finds through the [`Remediator`]
//! trait. Implementations either repair (queueing jobs), observe (logging,
//! printing, counting), or record the call for later replay. Decorators own
//! their inner remediator and forward to it, so chains are built by plain
//! composition:
//!
//! ```text
//! Checker ──► Counting ──► Printing ──► Queueing ──► JobQueue
//!                                 └──► Recording ──► (replayed by ClusterCoordinator)
//! ```

mod decorators;
mod queueing;
mod recording;

pub use decorators::{CountingRemediator, LogOnlyRemediator, NoopRemediator, PrintingRemediator};
pub use queueing::{
    ChannelJobQueue, DeleteDocJob, EventClock, Job, JobHandle, JobQueue, JobReceiver,
    QueueingRemediator, ResyncJob, SANEITIZER_UPDATE_KIND,
};
pub use recording::{ActionLog, RecordingRemediator};

use serde::{Deserialize, Serialize};

use crate::error::RemediationError;
use crate::model::{DriftKind, Page, Title};

/// Corrective operations for each kind of drift.
///
/// Every operation must be idempotent: the job transport delivers at least
/// once, so the same call may be replayed.
pub trait Remediator {
    /// A redirect is indexed; it should not be.
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError>;

    /// A live page is missing from the index.
    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError>;

    /// A document exists with no backing page. Odds are good it was deleted.
    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError>;

    /// A page's document lives under the wrong index suffix.
    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError>;

    /// The indexed document was built from an older revision.
    fn old_version_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError>;

    /// The document is due for periodic re-derivation.
    fn old_document(&mut self, page: &Page) -> Result<(), RemediationError>;
}

impl<R: Remediator + ?Sized> Remediator for &mut R {
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        (**self).redirect_in_index(doc_id, page, index_suffix)
    }

    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError> {
        (**self).page_not_in_index(page)
    }

    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError> {
        (**self).ghost_page_in_index(doc_id, title)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        (**self).page_in_wrong_index(doc_id, page, index_suffix)
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        (**self).old_version_in_index(doc_id, page, index_suffix)
    }

    fn old_document(&mut self, page: &Page) -> Result<(), RemediationError> {
        (**self).old_document(page)
    }
}

impl<R: Remediator + ?Sized> Remediator for Box<R> {
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        (**self).redirect_in_index(doc_id, page, index_suffix)
    }

    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError> {
        (**self).page_not_in_index(page)
    }

    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError> {
        (**self).ghost_page_in_index(doc_id, title)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        (**self).page_in_wrong_index(doc_id, page, index_suffix)
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        (**self).old_version_in_index(doc_id, page, index_suffix)
    }

    fn old_document(&mut self, page: &Page) -> Result<(), RemediationError> {
        (**self).old_document(page)
    }
}

/// One recorded remediation call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Action {
    RedirectInIndex {
        doc_id: String,
        page: Page,
        index_suffix: String,
    },
    PageNotInIndex {
        page: Page,
    },
    GhostPageInIndex {
        doc_id: String,
        title: Title,
    },
    PageInWrongIndex {
        doc_id: String,
        page: Page,
        index_suffix: String,
    },
    OldVersionInIndex {
        doc_id: String,
        page: Page,
        index_suffix: String,
    },
    OldDocument {
        page: Page,
    },
}

impl Action {
    pub fn kind(&self) -> DriftKind {
        match self {
            Self::RedirectInIndex { .. } => DriftKind::RedirectInIndex,
            Self::PageNotInIndex { .. } => DriftKind::PageNotInIndex,
            Self::GhostPageInIndex { .. } => DriftKind::GhostPageInIndex,
            Self::PageInWrongIndex { .. } => DriftKind::PageInWrongIndex,
            Self::OldVersionInIndex { .. } => DriftKind::OldVersionInIndex,
            Self::OldDocument { .. } => DriftKind::OldDocument,
        }
    }

    /// Name of the remediator method this action invokes.
    pub fn method(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Invoke the matching method on `remediator` with the recorded arguments.
    pub fn apply<R: Remediator + ?Sized>(
        &self,
        remediator: &mut R,
    ) -> Result<(), RemediationError> {
        match self {
            Self::RedirectInIndex {
                doc_id,
                page,
                index_suffix,
            } => remediator.redirect_in_index(doc_id, page, index_suffix),
            Self::PageNotInIndex { page } => remediator.page_not_in_index(page),
            Self::GhostPageInIndex { doc_id, title } => {
                remediator.ghost_page_in_index(doc_id, title)
            }
            Self::PageInWrongIndex {
                doc_id,
                page,
                index_suffix,
            } => remediator.page_in_wrong_index(doc_id, page, index_suffix),
            Self::OldVersionInIndex {
                doc_id,
                page,
                index_suffix,
            } => remediator.old_version_in_index(doc_id, page, index_suffix),
            Self::OldDocument { page } => remediator.old_document(page),
        }
    }
}
