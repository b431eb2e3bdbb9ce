//! Batch run driver.
//!
//! Walks an inclusive page id range in fixed-size batches. Each batch is
//! checked against every managed cluster, then the recorded fixes are sent
//! through the [`ClusterCoordinator`]. The run pauses instead of finishing
//! when the job queue is backed up or the time budget is spent; the caller
//! decides if and when to resume from [`Pause::resume_from`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::checker::{CheckReport, Checker, PageCache, PageStore};
use crate::config::{ProfileConfig, validate_batch_size};
use crate::coordinator::{BatchReport, BroadcastRemediator, ClusterCoordinator};
use crate::error::{CoordinatorError, Result, StoreError};
use crate::model::PageId;
use crate::remediator::{JobQueue, Remediator};

/// Ids scanned past the highest known page so recently deleted tail pages
/// still get their ghosts cleaned.
pub const TO_ID_SLACK: PageId = 100;

// ---------------------------------------------------------------------------
// Ranges and chunks
// ---------------------------------------------------------------------------

/// Inclusive page id range. Empty when `from_id > to_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub from_id: PageId,
    pub to_id: PageId,
}

impl ScanRange {
    pub fn new(from_id: PageId, to_id: PageId) -> Self {
        Self { from_id, to_id }
    }

    /// Fill in missing bounds: `from_id` defaults to 0, `to_id` to the
    /// highest page id plus [`TO_ID_SLACK`] (0 for an empty store).
    pub fn resolve(
        from_id: Option<PageId>,
        to_id: Option<PageId>,
        store: &dyn PageStore,
    ) -> std::result::Result<Self, StoreError> {
        let to_id = match to_id {
            Some(id) => id,
            None => store
                .max_page_id()?
                .map_or(0, |max| max.saturating_add(TO_ID_SLACK)),
        };
        Ok(Self::new(from_id.unwrap_or(0), to_id))
    }

    pub fn is_empty(&self) -> bool {
        self.from_id > self.to_id
    }

    /// Number of ids covered, saturating at `u64::MAX`.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.to_id - self.from_id).saturating_add(1)
        }
    }

    pub fn ids(&self) -> Vec<PageId> {
        if self.is_empty() {
            return Vec::new();
        }
        (self.from_id..=self.to_id).collect()
    }

    /// Consecutive sub-ranges of at most `size` ids. A zero size is treated as 1.
    pub fn batches(&self, size: u64) -> Batches {
        Batches {
            next: (!self.is_empty()).then_some(self.from_id),
            to_id: self.to_id,
            size: size.max(1),
        }
    }
}

impl std::fmt::Display for ScanRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.from_id, self.to_id)
    }
}

/// Iterator returned by [`ScanRange::batches`].
#[derive(Debug, Clone)]
pub struct Batches {
    next: Option<PageId>,
    to_id: PageId,
    size: u64,
}

impl Iterator for Batches {
    type Item = ScanRange;

    fn next(&mut self) -> Option<ScanRange> {
        let from_id = self.next?;
        let end = from_id.saturating_add(self.size - 1).min(self.to_id);
        self.next = end.checked_add(1).filter(|n| *n <= self.to_id);
        Some(ScanRange::new(from_id, end))
    }
}

/// How to split a range for separate processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSpec {
    /// Chunks of at most this many ids (`"500"`).
    Size(u64),
    /// At most this many chunks of equal rounded-up size (`"8total"`). The
    /// rounding can leave fewer chunks when the range does not divide evenly.
    Total(u64),
}

impl std::str::FromStr for ChunkSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, total) = match s.strip_suffix("total") {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid chunk size: {s}. Expected N or Ntotal"))?;
        if n == 0 {
            return Err("chunk size must be > 0".to_string());
        }
        Ok(if total { Self::Total(n) } else { Self::Size(n) })
    }
}

/// Split `range` into chunks of at most `chunk_size` ids.
pub fn chunk_ranges(range: ScanRange, chunk_size: u64) -> Vec<ScanRange> {
    range.batches(chunk_size).collect()
}

/// Split `range` according to `spec`.
pub fn build_chunks(range: ScanRange, spec: ChunkSpec) -> Vec<ScanRange> {
    match spec {
        ChunkSpec::Size(size) => chunk_ranges(range, size),
        ChunkSpec::Total(count) => chunk_ranges(range, range.len().div_ceil(count.max(1))),
    }
}

/// Progress line for one finished batch: `[<label>]<last>/<to>`.
pub fn format_progress(label: &str, last_id: PageId, to_id: PageId) -> String {
    format!("[{label:>20}]{last_id:>10}/{to_id}")
}

// ---------------------------------------------------------------------------
// Run limits and progress
// ---------------------------------------------------------------------------

/// When a run should stop early.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanLimits {
    /// Pause once more jobs than this are waiting in the queue.
    pub max_pressure: Option<usize>,
    /// Pause once the run has lasted longer than this.
    pub max_time: Option<Duration>,
    /// Stop after this many batches (0 = unlimited).
    pub max_batches: usize,
}

impl ScanLimits {
    pub fn from_profile(profile: &ProfileConfig) -> Self {
        Self {
            max_pressure: profile.max_pressure,
            max_time: profile.max_time_secs.map(Duration::from_secs),
            max_batches: 0,
        }
    }
}

/// Why a run paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PauseReason {
    Pressure { depth: usize, max: usize },
    TimeLimit { elapsed_ms: u64, max_ms: u64 },
    BatchLimit { max: usize },
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pressure { depth, max } => write!(f, "{depth} jobs queued (max {max})"),
            Self::TimeLimit { elapsed_ms, max_ms } => {
                write!(f, "ran {elapsed_ms}ms (max {max_ms}ms)")
            }
            Self::BatchLimit { max } => write!(f, "batch limit {max} reached"),
        }
    }
}

/// A run that stopped before the end of its range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pause {
    /// First id of the batch that was not checked.
    pub resume_from: PageId,
    #[serde(flatten)]
    pub reason: PauseReason,
}

/// Per-cluster totals over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTotals {
    pub checked: u64,
    pub fixed: u64,
    pub old: u64,
    pub malformed: u64,
}

impl ClusterTotals {
    fn add(&mut self, report: &CheckReport) {
        self.checked += report.checked as u64;
        self.fixed += report.fixed as u64;
        self.old += report.old as u64;
        self.malformed += report.malformed().count() as u64;
    }
}

/// Progress of a run, returned when it finishes or pauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub range: Option<ScanRange>,
    pub batches: u64,
    pub optimized_batches: u64,
    /// Page ids visited, each counted once however many clusters checked it.
    pub pages_scanned: u64,
    /// Remediator calls made while sending batches.
    pub actions_sent: u64,
    pub last_id: Option<PageId>,
    pub clusters: BTreeMap<String, ClusterTotals>,
    /// The whole range was covered.
    pub caught_up: bool,
    pub paused: Option<Pause>,
}

impl ScanProgress {
    pub fn fixed(&self) -> u64 {
        self.clusters.values().map(|t| t.fixed).sum()
    }
}

/// One finished batch, handed to the observer of [`SaneitizeRun::run_with`].
#[derive(Debug)]
pub struct BatchSummary<'a> {
    pub range: ScanRange,
    pub to_id: PageId,
    pub reports: &'a [CheckReport],
    pub sent: &'a BatchReport,
}

/// Monotonic time source, injectable for tests.
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Drives checkers and the coordinator over a page id range.
pub struct SaneitizeRun<R, B> {
    checkers: Vec<Checker>,
    coordinator: ClusterCoordinator<R, B>,
    cache: PageCache,
    batch_size: usize,
    limits: ScanLimits,
    pressure: Option<Arc<dyn JobQueue>>,
    clock: Clock,
}

impl<R: Remediator, B: BroadcastRemediator> SaneitizeRun<R, B> {
    /// Pair one checker with every cluster the coordinator manages.
    pub fn new(
        checkers: Vec<Checker>,
        coordinator: ClusterCoordinator<R, B>,
        batch_size: usize,
    ) -> Result<Self> {
        validate_batch_size(batch_size)?;
        let mut clusters: Vec<String> = checkers.iter().map(|c| c.cluster().to_string()).collect();
        clusters.sort();
        let managed: Vec<String> = coordinator.managed_clusters().into_iter().collect();
        if clusters != managed {
            return Err(CoordinatorError::CheckerMismatch {
                checkers: clusters,
                managed,
            }
            .into());
        }
        Ok(Self {
            checkers,
            coordinator,
            cache: PageCache::new(),
            batch_size,
            limits: ScanLimits::default(),
            pressure: None,
            clock: Arc::new(Instant::now),
        })
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ScanLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Queue whose depth is compared with `max_pressure`.
    #[must_use]
    pub fn with_pressure_source(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.pressure = Some(queue);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn coordinator(&self) -> &ClusterCoordinator<R, B> {
        &self.coordinator
    }

    pub fn into_coordinator(self) -> ClusterCoordinator<R, B> {
        self.coordinator
    }

    pub fn run(&mut self, range: ScanRange) -> Result<ScanProgress> {
        self.run_with(range, |_| {})
    }

    /// Run over `range`, calling `on_batch` after every sent batch.
    pub fn run_with<F>(&mut self, range: ScanRange, mut on_batch: F) -> Result<ScanProgress>
    where
        F: FnMut(&BatchSummary<'_>),
    {
        let span = crate::saneitizer_span!(
            "saneitize_run",
            from_id = range.from_id,
            to_id = range.to_id,
            batch_size = self.batch_size
        );
        let _guard = span.enter();

        let started = (self.clock)();
        let mut progress = ScanProgress {
            range: Some(range),
            ..ScanProgress::default()
        };

        for batch in range.batches(self.batch_size as u64) {
            if let Some(reason) = self.should_pause(started, &progress) {
                tracing::info!(
                    resume_from = batch.from_id,
                    %reason,
                    "pausing sanitizer run"
                );
                progress.paused = Some(Pause {
                    resume_from: batch.from_id,
                    reason,
                });
                return Ok(progress);
            }

            let ids = batch.ids();
            self.cache.clear();
            let mut reports = Vec::with_capacity(self.checkers.len());
            for checker in &self.checkers {
                let cluster = checker.cluster();
                let recorder = self.coordinator.recorder_mut(cluster).ok_or_else(|| {
                    CoordinatorError::CheckerMismatch {
                        checkers: vec![cluster.to_string()],
                        managed: Vec::new(),
                    }
                })?;
                let report = checker.check(&ids, &mut self.cache, recorder)?;
                progress
                    .clusters
                    .entry(report.cluster.clone())
                    .or_default()
                    .add(&report);
                reports.push(report);
            }
            let sent = self.coordinator.send_batch()?;

            progress.batches += 1;
            if sent.optimized {
                progress.optimized_batches += 1;
            }
            progress.pages_scanned += batch.len();
            progress.actions_sent += sent.total_actions() as u64;
            progress.last_id = Some(batch.to_id);
            tracing::debug!(
                from_id = batch.from_id,
                to_id = batch.to_id,
                actions = sent.total_actions(),
                optimized = sent.optimized,
                "batch done"
            );
            on_batch(&BatchSummary {
                range: batch,
                to_id: range.to_id,
                reports: &reports,
                sent: &sent,
            });
        }

        progress.caught_up = true;
        tracing::info!(
            batches = progress.batches,
            pages = progress.pages_scanned,
            fixed = progress.fixed(),
            "sanitizer run finished"
        );
        Ok(progress)
    }

    /// Pressure is checked before every batch. Time and batch limits only
    /// after the first one, so every run makes progress.
    fn should_pause(&self, started: Instant, progress: &ScanProgress) -> Option<PauseReason> {
        if let (Some(queue), Some(max)) = (&self.pressure, self.limits.max_pressure) {
            let depth = queue.depth();
            if depth > max {
                return Some(PauseReason::Pressure { depth, max });
            }
        }
        if progress.batches == 0 {
            return None;
        }
        if let Some(max_time) = self.limits.max_time {
            let elapsed = (self.clock)().saturating_duration_since(started);
            if elapsed > max_time {
                return Some(PauseReason::TimeLimit {
                    elapsed_ms: elapsed.as_millis() as u64,
                    max_ms: max_time.as_millis() as u64,
                });
            }
        }
        let max = self.limits.max_batches;
        if max > 0 && progress.batches >= max as u64 {
            return Some(PauseReason::BatchLimit { max });
        }
        None
    }
}
