//! Remediator that turns problems into index maintenance jobs.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use super::Remediator;
use crate::error::{RemediationError, TransportError};
use crate::model::{Page, Title};

/// `update_kind` attached to every resync this crate emits.
pub const SANEITIZER_UPDATE_KIND: &str = "saneitizer";

/// Remove one document from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDocJob {
    pub title: Title,
    pub doc_id: String,
    /// Suffix of the index holding the document, `None` for every suffix.
    pub index_suffix: Option<String>,
    /// Target cluster, `None` for every writable cluster.
    pub cluster: Option<String>,
}

/// Rebuild a page's document from the authoritative store and write it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncJob {
    pub title: Title,
    /// Target cluster, `None` for every writable cluster.
    pub cluster: Option<String>,
    pub update_kind: String,
    pub priority: bool,
    /// Unix seconds at which the remediation was decided.
    pub root_event_time: i64,
}

/// A job handed to the queue. Both kinds are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    DeleteDoc(DeleteDocJob),
    Resync(ResyncJob),
}

impl Job {
    pub fn title(&self) -> &Title {
        match self {
            Self::DeleteDoc(job) => &job.title,
            Self::Resync(job) => &job.title,
        }
    }

    pub fn cluster(&self) -> Option<&str> {
        match self {
            Self::DeleteDoc(job) => job.cluster.as_deref(),
            Self::Resync(job) => job.cluster.as_deref(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteDoc(_))
    }
}

/// Receipt for an accepted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle {
    pub sequence: u64,
}

/// Outbound job transport.
///
/// Delivery is at-least-once and retries belong to the transport; callers
/// only see whether the job was accepted.
pub trait JobQueue: Send + Sync {
    fn submit(&self, job: Job) -> Result<JobHandle, TransportError>;

    /// Jobs accepted but not yet consumed.
    fn depth(&self) -> usize;
}

/// Bounded in-process queue backed by a crossbeam channel.
#[derive(Debug)]
pub struct ChannelJobQueue {
    sender: Sender<Job>,
    /// `None` for an unbounded queue.
    capacity: Option<usize>,
    sequence: AtomicU64,
}

/// Consumer side of a [`ChannelJobQueue`].
#[derive(Debug)]
pub struct JobReceiver {
    receiver: Receiver<Job>,
}

impl ChannelJobQueue {
    /// Queue that rejects jobs with `QueueFull` once `capacity` are waiting.
    pub fn bounded(capacity: usize) -> (Self, JobReceiver) {
        Self::from_channel(channel::bounded(capacity), Some(capacity))
    }

    /// Queue that never rejects; backlog shows up only in [`JobQueue::depth`].
    pub fn unbounded() -> (Self, JobReceiver) {
        Self::from_channel(channel::unbounded(), None)
    }

    fn from_channel(
        (sender, receiver): (Sender<Job>, Receiver<Job>),
        capacity: Option<usize>,
    ) -> (Self, JobReceiver) {
        (
            Self {
                sender,
                capacity,
                sequence: AtomicU64::new(0),
            },
            JobReceiver { receiver },
        )
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl JobQueue for ChannelJobQueue {
    fn submit(&self, job: Job) -> Result<JobHandle, TransportError> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(JobHandle {
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            }),
            Err(TrySendError::Full(_)) => Err(TransportError::QueueFull {
                capacity: self.capacity.unwrap_or_default(),
            }),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }

    fn depth(&self) -> usize {
        self.sender.len()
    }
}

impl JobReceiver {
    pub fn try_recv(&self) -> Option<Job> {
        self.receiver.try_recv().ok()
    }

    /// Take every job currently queued.
    pub fn drain(&self) -> Vec<Job> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Source of `root_event_time` values.
pub type EventClock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn wall_clock() -> EventClock {
    Arc::new(|| chrono::Utc::now().timestamp())
}

/// Persists fixes by submitting jobs for one cluster, or for every writable
/// cluster when `cluster` is `None`.
pub struct QueueingRemediator {
    cluster: Option<String>,
    queue: Arc<dyn JobQueue>,
    clock: EventClock,
}

impl fmt::Debug for QueueingRemediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueingRemediator")
            .field("cluster", &self.cluster)
            .field("queue_depth", &self.queue.depth())
            .finish_non_exhaustive()
    }
}

impl QueueingRemediator {
    pub fn new(cluster: Option<String>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            cluster,
            queue,
            clock: wall_clock(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: EventClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    fn delete(
        &self,
        title: &Title,
        doc_id: &str,
        index_suffix: Option<&str>,
    ) -> Result<(), RemediationError> {
        let job = Job::DeleteDoc(DeleteDocJob {
            title: title.clone(),
            doc_id: doc_id.to_string(),
            index_suffix: index_suffix.map(str::to_string),
            cluster: self.cluster.clone(),
        });
        self.push(job)
    }

    fn resync(&self, page: &Page) -> Result<(), RemediationError> {
        let job = Job::Resync(ResyncJob {
            title: page.title.clone(),
            cluster: self.cluster.clone(),
            update_kind: SANEITIZER_UPDATE_KIND.to_string(),
            priority: false,
            root_event_time: (self.clock)(),
        });
        self.push(job)
    }

    fn push(&self, job: Job) -> Result<(), RemediationError> {
        let handle = self.queue.submit(job)?;
        tracing::trace!(
            sequence = handle.sequence,
            cluster = self.cluster.as_deref().unwrap_or("*"),
            "job submitted"
        );
        Ok(())
    }
}

impl Remediator for QueueingRemediator {
    fn redirect_in_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        // The redirect document may sit in a suffix the resync never writes.
        self.delete(&page.title, doc_id, Some(index_suffix))?;
        self.resync(page)
    }

    fn page_not_in_index(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.resync(page)
    }

    fn ghost_page_in_index(
        &mut self,
        doc_id: &str,
        title: &Title,
    ) -> Result<(), RemediationError> {
        self.delete(title, doc_id, None)
    }

    fn page_in_wrong_index(
        &mut self,
        doc_id: &str,
        page: &Page,
        index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.delete(&page.title, doc_id, Some(index_suffix))?;
        self.resync(page)
    }

    fn old_version_in_index(
        &mut self,
        _doc_id: &str,
        page: &Page,
        _index_suffix: &str,
    ) -> Result<(), RemediationError> {
        self.resync(page)
    }

    fn old_document(&mut self, page: &Page) -> Result<(), RemediationError> {
        self.resync(page)
    }
}
