//! Cross-cluster batching of recorded fixes.
//!
//! Each managed cluster is scanned into its own [`RecordingRemediator`]. At the
//! end of a batch the coordinator compares the logs. When every managed
//! cluster needs exactly the same fixes, and the managed set is exactly the
//! set of clusters writable for the sanitizer, the fixes are sent once as
//! broadcast jobs (`cluster = None`). Otherwise every cluster gets its own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assignment::{ClusterAssignment, UpdateGroup};
use crate::error::{CoordinatorError, RemediationError};
use crate::model::{Page, Title};
use crate::remediator::{JobQueue, QueueingRemediator, RecordingRemediator, Remediator};

// ---------------------------------------------------------------------------
// Broadcast seam
// ---------------------------------------------------------------------------

/// Remediator whose jobs land on every writable cluster at once.
pub trait BroadcastRemediator: Remediator {
    /// Writable clusters as seen when the remediator was built.
    fn writable_clusters(&self) -> &BTreeSet<String>;

    /// Whether fixes needed by exactly `clusters` may be sent as one job.
    fn can_send_optimized_job(&self, clusters: &BTreeSet<String>) -> bool {
        clusters == self.writable_clusters()
    }
}

/// Broadcast remediator over a fixed snapshot of the writable clusters.
///
/// With a [`QueueingRemediator`] inside, every job it emits has
/// `cluster = None` and lands on all writable clusters.
#[derive(Debug)]
pub struct AllClustersRemediator<R> {
    writable: BTreeSet<String>,
    inner: R,
}

/// Broadcast remediator that queues jobs for every writable cluster.
pub type AllClustersQueueingRemediator = AllClustersRemediator<QueueingRemediator>;

impl AllClustersRemediator<QueueingRemediator> {
    /// Snapshot the sanitizer's writable clusters and queue broadcast jobs.
    pub fn new(assignment: &dyn ClusterAssignment, queue: Arc<dyn JobQueue>) -> Self {
        Self::from_parts(
            assignment.writable_clusters(UpdateGroup::Saneitizer),
            QueueingRemediator::new(None, queue),
        )
    }
}

impl<R: Remediator> AllClustersRemediator<R> {
    pub fn from_parts(writable: BTreeSet<String>, inner: R) -> Self {
        Self { writable, inner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: Remediator> BroadcastRemediator for AllClustersRemediator<R> {
    fn writable_clusters(&self) -> &BTreeSet<String> {
        &self.writable
    }
}

impl<R: Remediator> Remediator for AllClustersRemediator<R> {
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.inner.redirect_in_index(doc_id, page, index_suffix)
    }

    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.inner.page_not_in_index(page)
    }

    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError> {
        self.inner.ghost_page_in_index(doc_id, title)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.inner.page_in_wrong_index(doc_id, page, index_suffix)
    }

    fn old_version_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.inner.old_version_in_index(doc_id, page, index_suffix)
    }

    fn old_document(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.inner.old_document(page)
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// What one [`ClusterCoordinator::send_batch`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// The shared log was sent once through the broadcast remediator.
    pub optimized: bool,
    pub broadcast_actions: usize,
    /// Actions replayed onto each cluster's own remediator.
    pub per_cluster_actions: BTreeMap<String, usize>,
}

impl BatchReport {
    pub fn total_actions(&self) -> usize {
        self.broadcast_actions + self.per_cluster_actions.values().sum::<usize>()
    }
}

/// Holds one recorder and one remediator per managed cluster, plus the
/// broadcast remediator.
pub struct ClusterCoordinator<R, B> {
    remediators: BTreeMap<String, R>,
    recorders: BTreeMap<String, RecordingRemediator>,
    broadcast: B,
}

impl<R: Remediator, B: BroadcastRemediator> ClusterCoordinator<R, B> {
    /// Validate that the three inputs agree on the cluster set.
    pub fn new(
        remediators: BTreeMap<String, R>,
        recorders: BTreeMap<String, RecordingRemediator>,
        broadcast: B,
    ) -> Result<Self, CoordinatorError> {
        if !remediators.keys().eq(recorders.keys()) {
            return Err(CoordinatorError::ClusterMismatch {
                remediators: remediators.keys().cloned().collect(),
                recorders: recorders.keys().cloned().collect(),
            });
        }
        if recorders.is_empty() {
            return Err(CoordinatorError::NoClusters);
        }
        // An empty writable set fails every optimization check, so it is allowed.
        let writable = broadcast.writable_clusters();
        if !writable.is_empty() {
            if let Some(cluster) = recorders.keys().find(|c| !writable.contains(*c)) {
                return Err(CoordinatorError::NotWritable {
                    cluster: cluster.clone(),
                });
            }
        }
        Ok(Self {
            remediators,
            recorders,
            broadcast,
        })
    }

    /// Build per-cluster recorders for the given remediators.
    pub fn with_fresh_recorders(
        remediators: BTreeMap<String, R>,
        broadcast: B,
    ) -> Result<Self, CoordinatorError> {
        let recorders = remediators
            .keys()
            .map(|cluster| (cluster.clone(), RecordingRemediator::new()))
            .collect();
        Self::new(remediators, recorders, broadcast)
    }

    pub fn managed_clusters(&self) -> BTreeSet<String> {
        self.recorders.keys().cloned().collect()
    }

    /// Recorder that the scan for `cluster` should report into.
    pub fn recorder_mut(&mut self, cluster: &str) -> Option<&mut RecordingRemediator> {
        self.recorders.get_mut(cluster)
    }

    pub fn recorder(&self, cluster: &str) -> Option<&RecordingRemediator> {
        self.recorders.get(cluster)
    }

    pub fn remediator(&self, cluster: &str) -> Option<&R> {
        self.remediators.get(cluster)
    }

    pub fn broadcast(&self) -> &B {
        &self.broadcast
    }

    /// Replay the recorded fixes, collapsed where safe, then clear the logs.
    ///
    /// Not transactional across clusters: on error the remaining logs are
    /// kept and clusters replayed before the failure have received their jobs.
    pub fn send_batch(&mut self) -> Result<BatchReport, RemediationError> {
        let managed = self.managed_clusters();
        let mut report = BatchReport::default();

        for class in self.equivalence_classes() {
            let Some(shared) = class.first().and_then(|c| self.recorders.get(c)) else {
                continue;
            };
            if shared.is_empty() {
                continue;
            }
            if class.len() == managed.len() && self.broadcast.can_send_optimized_job(&managed) {
                tracing::debug!(
                    clusters = ?managed,
                    actions = shared.actions().len(),
                    "sending optimized batch"
                );
                shared.replay_on(&mut self.broadcast)?;
                report.optimized = true;
                report.broadcast_actions += shared.actions().len();
                continue;
            }
            for cluster in &class {
                let (Some(recorder), Some(remediator)) =
                    (self.recorders.get(cluster), self.remediators.get_mut(cluster))
                else {
                    continue;
                };
                recorder.replay_on(remediator)?;
                *report
                    .per_cluster_actions
                    .entry(cluster.clone())
                    .or_default() += recorder.actions().len();
            }
        }

        for recorder in self.recorders.values_mut() {
            recorder.reset_actions();
        }
        if report.total_actions() > 0 {
            tracing::debug!(
                optimized = report.optimized,
                broadcast_actions = report.broadcast_actions,
                per_cluster = ?report.per_cluster_actions,
                "batch sent"
            );
        }
        Ok(report)
    }

    /// Partition managed clusters by identical action logs, in cluster order.
    fn equivalence_classes(&self) -> Vec<Vec<String>> {
        let mut classes: Vec<Vec<String>> = Vec::new();
        for (cluster, recorder) in &self.recorders {
            let existing = classes.iter_mut().find(|class| {
                class
                    .first()
                    .and_then(|c| self.recorders.get(c))
                    .is_some_and(|rep| rep.has_same_actions(recorder))
            });
            match existing {
                Some(class) => class.push(cluster.clone()),
                None => classes.push(vec![cluster.clone()]),
            }
        }
        classes
    }
}
