//! Check command - scan a snapshot and repair drift.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use saneitizer_core::assignment::{
    ClusterAssignment, ClusterConfig, MultiClusterAssignment, UpdateGroup,
};
use saneitizer_core::checker::{Checker, PageStore, make_is_old_fn};
use saneitizer_core::config::{SaneitizerConfig, validate_batch_size};
use saneitizer_core::coordinator::{AllClustersRemediator, ClusterCoordinator};
use saneitizer_core::index_layout::IndexLayout;
use saneitizer_core::logging::LogLevel;
use saneitizer_core::metrics::CounterRegistry;
use saneitizer_core::remediator::{
    ChannelJobQueue, JobQueue, JobReceiver, LogOnlyRemediator, NoopRemediator,
    PrintingRemediator, QueueingRemediator, Remediator,
};
use saneitizer_core::scan::{SaneitizeRun, ScanLimits, ScanProgress, ScanRange, format_progress};
use saneitizer_core::snapshot::Snapshot;

use crate::OutputFormat;

/// Arguments for the check command.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// JSON snapshot holding the pages and every cluster's index records.
    #[arg(long)]
    pub snapshot: PathBuf,

    /// First page id to check (default 0).
    #[arg(long)]
    pub from_id: Option<u64>,

    /// Last page id to check (default: highest page id + 100).
    #[arg(long)]
    pub to_id: Option<u64>,

    /// Pages per batch, overriding `profile.batch_size`.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Stop after this many batches and report where to resume.
    #[arg(long)]
    pub max_batches: Option<usize>,

    /// Only check this cluster.
    #[arg(long)]
    pub cluster: Option<String>,

    /// Detect drift but do nothing about it.
    #[arg(long, conflicts_with = "log_only")]
    pub noop: bool,

    /// Log every problem instead of queueing jobs.
    #[arg(long)]
    pub log_only: bool,

    /// Log pages found sane too.
    #[arg(long)]
    pub log_sane: bool,

    /// Trust the page table's redirect flag.
    #[arg(long)]
    pub fast_redirect_check: bool,

    /// Do not print a line per problem or per batch.
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Write queued jobs here as JSON lines instead of stdout.
    #[arg(long)]
    pub jobs_out: Option<PathBuf>,
}

/// What the per-cluster and broadcast remediators do with a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Noop,
    LogOnly(LogLevel),
    Queue,
}

impl Mode {
    fn from_args(args: &CheckArgs, config: &SaneitizerConfig) -> Self {
        if args.noop {
            Self::Noop
        } else if args.log_only {
            Self::LogOnly(config.checker.log_only_level)
        } else {
            Self::Queue
        }
    }
}

/// Where human-readable lines go: stderr whenever stdout carries jobs or JSON.
#[derive(Debug, Clone, Copy)]
struct HumanSink {
    stderr: bool,
}

impl HumanSink {
    fn open(self) -> Box<dyn Write> {
        if self.stderr {
            Box::new(io::stderr())
        } else {
            Box::new(io::stdout())
        }
    }
}

/// Execute the check command.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be read, the cluster layout is
/// inconsistent, or a job cannot be queued or written.
pub fn execute(
    args: &CheckArgs,
    config: &SaneitizerConfig,
    config_loaded: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut profile = config.profile.clone();
    if let Some(batch_size) = args.batch_size {
        validate_batch_size(batch_size)?;
        profile.batch_size = batch_size;
    }
    let mode = Mode::from_args(args, config);

    let snapshot = Snapshot::load(&args.snapshot)
        .with_context(|| format!("cannot load snapshot {}", args.snapshot.display()))?;
    // Unless a config file lays out clusters, the snapshot's are the whole topology.
    let wiki_id = config.index.wiki_id.clone();
    let unset = ClusterConfig {
        wiki_id: wiki_id.clone(),
        ..ClusterConfig::default()
    };
    let cluster_config = if config_loaded && config.clusters != unset {
        config.clusters.clone()
    } else {
        ClusterConfig::for_replicas(wiki_id, snapshot.clusters.keys().cloned())
    };
    let assignment = MultiClusterAssignment::new(cluster_config)?;
    let managed = select_clusters(&assignment, args.cluster.as_deref())?;

    let (store, mut indexes) = snapshot.into_backends();
    let store: Arc<dyn PageStore> = store;
    let range = ScanRange::resolve(args.from_id, args.to_id, store.as_ref())?;

    let layout = Arc::new(IndexLayout::new(config.index.clone())?);
    let metrics = Arc::new(CounterRegistry::new());
    let mut checker_config = config.checker.checker;
    checker_config.log_sane |= args.log_sane;
    checker_config.fast_redirect_check |= args.fast_redirect_check;
    let is_old = make_is_old_fn(profile.loop_id, profile.old_document_cycles);

    // A single page may carry any number of stray records, so one batch has
    // no job bound. The queue is drained into the sink after every batch.
    let (queue, jobs) = ChannelJobQueue::unbounded();
    let queue: Arc<dyn JobQueue> = Arc::new(queue);
    let jobs_on_stdout = mode == Mode::Queue && args.jobs_out.is_none();
    let human = HumanSink {
        stderr: jobs_on_stdout || format == OutputFormat::Json,
    };
    let printing = (!args.quiet).then_some(human);

    let mut checkers = Vec::with_capacity(managed.len());
    let mut remediators = BTreeMap::new();
    for cluster in &managed {
        let index = indexes
            .remove(cluster)
            .with_context(|| format!("snapshot has no index for cluster {cluster}"))?;
        checkers.push(
            Checker::new(Arc::clone(&store), index, Arc::clone(&layout), Arc::clone(&metrics))
                .with_config(checker_config)
                .with_is_old(Arc::clone(&is_old)),
        );
        remediators.insert(
            cluster.clone(),
            build_remediator(mode, Some(cluster.clone()), &queue, printing),
        );
    }
    let broadcast = AllClustersRemediator::from_parts(
        assignment.writable_clusters(UpdateGroup::Saneitizer),
        build_remediator(mode, None, &queue, printing),
    );
    let coordinator = ClusterCoordinator::with_fresh_recorders(remediators, broadcast)?;
    let mut limits = ScanLimits::from_profile(&profile);
    if let Some(max_batches) = args.max_batches {
        limits.max_batches = max_batches;
    }
    let mut run = SaneitizeRun::new(checkers, coordinator, profile.batch_size)?
        .with_limits(limits)
        .with_pressure_source(Arc::clone(&queue));

    let mut jobs_out: Option<Box<dyn Write>> = match (mode, &args.jobs_out) {
        (Mode::Queue, Some(path)) => Some(Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        ))),
        (Mode::Queue, None) => Some(Box::new(io::stdout())),
        _ => None,
    };
    let mut progress_out = human.open();
    let show_progress = !args.quiet && format == OutputFormat::Text;
    let label = config.index.wiki_id.clone();

    tracing::info!(%range, clusters = ?managed, mode = ?mode, "starting check");
    let mut jobs_written = 0u64;
    let mut write_error: Option<anyhow::Error> = None;
    let progress = run.run_with(range, |batch| {
        if write_error.is_some() {
            return;
        }
        let result = write_jobs(&jobs, jobs_out.as_deref_mut()).and_then(|n| {
            jobs_written += n;
            if show_progress {
                writeln!(progress_out, "{}", format_progress(&label, batch.range.to_id, batch.to_id))?;
            }
            Ok(())
        });
        if let Err(e) = result {
            write_error = Some(e);
        }
    })?;
    if let Some(e) = write_error {
        return Err(e.context("cannot write jobs"));
    }
    jobs_written += write_jobs(&jobs, jobs_out.as_deref_mut())?;

    let mut out = HumanSink {
        stderr: jobs_on_stdout,
    }
    .open();
    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "progress": progress,
                "jobs_written": jobs_written,
                "metrics": metrics.snapshot(),
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        }
        OutputFormat::Text => write_summary(&mut out, &progress, jobs_written)?,
    }
    out.flush()?;
    Ok(())
}

/// Managed clusters of this run, narrowed to `only` when given.
fn select_clusters(
    assignment: &MultiClusterAssignment,
    only: Option<&str>,
) -> Result<BTreeSet<String>> {
    let managed = assignment.managed_clusters();
    let selected = match only {
        Some(cluster) if assignment.can_manage_cluster(cluster) => {
            BTreeSet::from([cluster.to_string()])
        }
        Some(cluster) => bail!(
            "cluster {cluster} is not managed here (managed: {})",
            managed.iter().cloned().collect::<Vec<_>>().join(", ")
        ),
        None => managed,
    };
    if selected.is_empty() {
        bail!("no clusters to check");
    }
    // Every replica we check needs a configured cluster serving our group.
    for replica in &selected {
        let serving = assignment.resolve_cluster(Some(replica))?;
        tracing::debug!(
            cluster = %replica,
            serving,
            group = assignment.group(),
            "cluster selected"
        );
    }
    Ok(selected)
}

fn build_remediator(
    mode: Mode,
    cluster: Option<String>,
    queue: &Arc<dyn JobQueue>,
    printing: Option<HumanSink>,
) -> Box<dyn Remediator> {
    let base: Box<dyn Remediator> = match mode {
        Mode::Noop => Box::new(NoopRemediator),
        Mode::LogOnly(level) => Box::new(LogOnlyRemediator::new(level)),
        Mode::Queue => Box::new(QueueingRemediator::new(cluster, Arc::clone(queue))),
    };
    match printing {
        Some(sink) => Box::new(PrintingRemediator::new(base, sink.open())),
        None => base,
    }
}

fn write_jobs(jobs: &JobReceiver, out: Option<&mut (dyn Write + 'static)>) -> Result<u64> {
    let pending = jobs.drain();
    let Some(out) = out else {
        return Ok(0);
    };
    let mut written = 0;
    for job in &pending {
        serde_json::to_writer(&mut *out, job)?;
        out.write_all(b"\n")?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

fn write_summary(out: &mut dyn Write, progress: &ScanProgress, jobs_written: u64) -> Result<()> {
    writeln!(
        out,
        "checked {} pages in {} batches ({} broadcast), {} fixes, {} jobs",
        progress.pages_scanned,
        progress.batches,
        progress.optimized_batches,
        progress.fixed(),
        jobs_written
    )?;
    for (cluster, totals) in &progress.clusters {
        writeln!(
            out,
            "  {cluster}: checked {}, fixed {}, old {}, malformed {}",
            totals.checked, totals.fixed, totals.old, totals.malformed
        )?;
    }
    if let Some(pause) = &progress.paused {
        writeln!(
            out,
            "paused ({}); resume with --from-id {}",
            pause.reason, pause.resume_from
        )?;
    }
    Ok(())
}
