//! Chunks command - split a page id range into separate `check` runs.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use saneitizer_core::scan::{ChunkSpec, ScanRange, build_chunks};
use saneitizer_core::snapshot::Snapshot;

use crate::OutputFormat;

/// Arguments for the chunks command.
#[derive(Debug, Args)]
pub struct ChunksArgs {
    /// First page id (default 0).
    #[arg(long)]
    pub from_id: Option<u64>,

    /// Last page id. Without it the snapshot's highest page id + 100 is used.
    #[arg(long)]
    pub to_id: Option<u64>,

    /// Snapshot to size the range from and to pass on to each `check`.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// `N` ids per chunk, or `Ntotal` for at most N chunks.
    #[arg(long)]
    pub chunk_size: ChunkSpec,
}

/// Execute the chunks command.
///
/// # Errors
///
/// Returns an error if neither `--to-id` nor a readable snapshot is given.
pub fn execute(args: &ChunksArgs, format: OutputFormat) -> Result<()> {
    let range = resolve_range(args)?;
    let chunks = build_chunks(range, args.chunk_size);
    tracing::debug!(%range, chunks = chunks.len(), "built chunks");

    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(&chunks)?)?;
        }
        OutputFormat::Text => {
            for chunk in &chunks {
                writeln!(out, "{}", command_line(args.snapshot.as_ref(), *chunk))?;
            }
        }
    }
    Ok(())
}

fn resolve_range(args: &ChunksArgs) -> Result<ScanRange> {
    match (&args.snapshot, args.to_id) {
        (Some(path), _) => {
            let snapshot = Snapshot::load(path)
                .with_context(|| format!("cannot load snapshot {}", path.display()))?;
            let (store, _) = snapshot.into_backends();
            Ok(ScanRange::resolve(args.from_id, args.to_id, store.as_ref())?)
        }
        (None, Some(to_id)) => Ok(ScanRange::new(args.from_id.unwrap_or(0), to_id)),
        (None, None) => bail!("--to-id is required without --snapshot"),
    }
}

fn command_line(snapshot: Option<&PathBuf>, chunk: ScanRange) -> String {
    let mut line = String::from("saneitize check");
    if let Some(path) = snapshot {
        line.push_str(&format!(" --snapshot {}", path.display()));
    }
    line.push_str(&format!(
        " --from-id {} --to-id {}",
        chunk.from_id, chunk.to_id
    ));
    line
}
