//! Remediator that buffers calls so they can be compared and replayed.

use super::{Action, Remediator};
use crate::error::RemediationError;
use crate::model::{Page, Title};

/// Ordered record of remediation calls for one cluster over one batch.
pub type ActionLog = Vec<Action>;

/// Records every call instead of acting on it.
///
/// One recorder is used per cluster per batch run. The log only grows until
/// [`reset_actions`](Self::reset_actions) is called.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingRemediator {
    actions: ActionLog,
}

impl RecordingRemediator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn reset_actions(&mut self) {
        self.actions.clear();
    }

    /// Invoke every recorded action on `other`, in recording order.
    ///
    /// Stops at the first failure; actions before it have been applied.
    pub fn replay_on<R: Remediator + ?Sized>(
        &self,
        other: &mut R,
    ) -> Result<(), RemediationError> {
        for action in &self.actions {
            action.apply(other)?;
        }
        Ok(())
    }

    /// Whether both recorders hold the same actions in the same order.
    pub fn has_same_actions(&self, other: &Self) -> bool {
        self.actions == other.actions
    }

    fn record(&mut self, action: Action) -> Result<(), RemediationError> {
        self.actions.push(action);
        Ok(())
    }
}

impl Remediator for RecordingRemediator {
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.record(Action::RedirectInIndex {
            doc_id: doc_id.to_string(),
            page: page.clone(),
            index_suffix: index_suffix.to_string(),
        })
    }

    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.record(Action::PageNotInIndex { page: page.clone() })
    }

    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError> {
        self.record(Action::GhostPageInIndex {
            doc_id: doc_id.to_string(),
            title: title.clone(),
        })
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.record(Action::PageInWrongIndex {
            doc_id: doc_id.to_string(),
            page: page.clone(),
            index_suffix: index_suffix.to_string(),
        })
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.record(Action::OldVersionInIndex {
            doc_id: doc_id.to_string(),
            page: page.clone(),
            index_suffix: index_suffix.to_string(),
        })
    }

    fn old_document(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.record(Action::OldDocument { page: page.clone() })
    }
}
