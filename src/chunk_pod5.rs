//! Module for splitting a POD5 file into deduplicated, bounded chunks.
//!
//! This is the `chunk-pod5` subcommand: list every read id in the source
//! POD5 file, drop ids that occur more than once, partition the remaining
//! singleton ids into batches of at most `batch_size`, and extract each
//! batch into its own POD5 file via the external `pod5` CLI. Each chunk is
//! verified after extraction by re-listing its read ids, and chunks whose
//! artifact already exists and verifies are skipped, so an aborted run can
//! be re-invoked and resumes at the first unfinished chunk.
//!
//! # Output
//!
//! - `<out_dir>/<prefix>_chunk<NNN>.pod5` - one file per chunk.
//! - `<out_dir>/<prefix>_duplicates.tsv` - read ids dropped as duplicates,
//!   with their occurrence counts.
//!
use crate::_chunking::{
    count_ids, partition, singletons, write_duplicates, Chunk, ChunkError, ChunkStatus,
};
use crate::store::{Pod5Store, ReadIdStore};
use fnv::FnvHashSet;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Spinner frames shared by the listing and chunking bars.
const TICK_STRINGS: &[&str] = &["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"];

/// Run the chunk-pod5 subcommand.
///
/// # Arguments
///
/// * `input_pod5` - The source POD5 file.
/// * `out_dir` - Directory for chunk artifacts, created if missing.
/// * `batch_size` - Maximum read ids per chunk.
/// * `prefix` - Artifact base name; defaults to the input file stem.
/// * `timeout` - Per-chunk extraction timeout in seconds.
/// * `strict` - Escalate soft count mismatches to hard failures.
/// * `pod5_bin` - Name or path of the `pod5` executable.
pub fn run(
    input_pod5: PathBuf,
    out_dir: PathBuf,
    batch_size: usize,
    prefix: Option<String>,
    timeout: u64,
    strict: bool,
    pod5_bin: String,
) -> Result<(), ChunkError> {
    if batch_size == 0 {
        return Err(ChunkError::Config(
            "batch size must be greater than zero".to_owned(),
        ));
    }
    let prefix = match prefix {
        Some(p) => p,
        None => input_pod5
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ChunkError::Config(format!(
                    "cannot derive a prefix from {}; pass --prefix",
                    input_pod5.display()
                ))
            })?,
    };
    std::fs::create_dir_all(&out_dir)?;

    let store = Pod5Store::new(pod5_bin, Duration::from_secs(timeout));

    // Full streaming pass over the source before any extraction
    let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout())
        .with_message("read ids listed");
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {spinner} {pos:>10} {msg}")
            .unwrap()
            .tick_strings(TICK_STRINGS),
    );
    let listing = store.list_ids(&input_pod5).map_err(ChunkError::List)?;
    let counts = count_ids(listing.inspect(|_| bar.inc(1))).map_err(ChunkError::List)?;
    let total_ids = bar.position();
    bar.finish();

    let (singleton_ids, duplicates) = singletons(&counts);
    info!(
        "{} read ids listed, {} singletons, {} duplicated ids",
        total_ids,
        singleton_ids.len(),
        duplicates.len()
    );

    let report_path = out_dir.join(format!("{}_duplicates.tsv", prefix));
    write_duplicates(&duplicates, File::create(&report_path)?)?;

    let mut chunks = partition(singleton_ids.len(), batch_size)?;
    info!(
        "{} chunks of up to {} read ids",
        chunks.len(),
        batch_size
    );

    let bar = ProgressBar::with_draw_target(Some(chunks.len() as u64), ProgressDrawTarget::stdout())
        .with_message("chunks");
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {spinner} {pos:>4}/{len:4} {msg}")
            .unwrap()
            .tick_strings(TICK_STRINGS),
    );
    let (extracted, skipped) = materialize(
        &store,
        &input_pod5,
        &singleton_ids,
        &mut chunks,
        &out_dir,
        &prefix,
        strict,
        &bar,
    )?;
    bar.finish();

    println!(
        "Singletons: {}\nDuplicated ids: {}\nChunks extracted: {}\nChunks skipped (already verified): {}",
        singleton_ids.len(),
        duplicates.len(),
        extracted,
        skipped
    );
    Ok(())
}

/// Materialize every chunk, strictly one extraction at a time.
///
/// Chunks whose artifact already exists and verifies are skipped without
/// re-extraction. The first hard failure aborts the run with that chunk's
/// ordinal; artifacts of previously verified chunks are left untouched, so
/// re-invoking resumes at the failed chunk.
///
/// Returns `(extracted, skipped)` chunk counts.
#[allow(clippy::too_many_arguments)]
pub fn materialize(
    store: &dyn ReadIdStore,
    source: &Path,
    singleton_ids: &[String],
    chunks: &mut [Chunk],
    out_dir: &Path,
    prefix: &str,
    strict: bool,
    progress: &ProgressBar,
) -> Result<(usize, usize), ChunkError> {
    let mut extracted = 0;
    let mut skipped = 0;
    for chunk in chunks.iter_mut() {
        let artifact = out_dir.join(chunk.file_name(prefix));

        if artifact.exists() {
            match check_artifact(store, &artifact, chunk, strict) {
                Ok(()) => {
                    info!(
                        "chunk {}: {} already verified, skipping",
                        chunk.ordinal,
                        artifact.display()
                    );
                    skipped += 1;
                    progress.inc(1);
                    continue;
                }
                Err(err) => {
                    chunk.status = ChunkStatus::Failed;
                    return Err(err);
                }
            }
        }

        chunk.status = ChunkStatus::Extracting;
        if let Err(err) = store.extract(source, chunk.ids(singleton_ids), &artifact) {
            chunk.status = ChunkStatus::Failed;
            return Err(ChunkError::Extraction {
                ordinal: chunk.ordinal,
                source: err,
            });
        }
        if let Err(err) = check_artifact(store, &artifact, chunk, strict) {
            chunk.status = ChunkStatus::Failed;
            return Err(err);
        }
        extracted += 1;
        progress.inc(1);
    }
    Ok((extracted, skipped))
}

/// Re-list the artifact's read ids and compare against the chunk.
///
/// Duplicated ids or an unreadable artifact are hard failures. A count
/// that differs from the expected chunk size with no duplicates signals an
/// upstream anomaly rather than a broken extraction; it is logged as a
/// warning unless `strict` is set. On success the chunk is marked
/// `Verified`.
fn check_artifact(
    store: &dyn ReadIdStore,
    artifact: &Path,
    chunk: &mut Chunk,
    strict: bool,
) -> Result<(), ChunkError> {
    let ordinal = chunk.ordinal;
    let unreadable = |source| ChunkError::Unreadable {
        ordinal,
        path: artifact.to_path_buf(),
        source,
    };
    let mut total = 0;
    let mut unique: FnvHashSet<String> = FnvHashSet::default();
    for id in store.list_ids(artifact).map_err(&unreadable)? {
        let id = id.map_err(&unreadable)?;
        total += 1;
        unique.insert(id);
    }
    if unique.len() != total {
        return Err(ChunkError::DuplicateIds {
            ordinal: chunk.ordinal,
            path: artifact.to_path_buf(),
            total,
            unique: unique.len(),
        });
    }
    if total != chunk.len() {
        if strict {
            return Err(ChunkError::CountMismatch {
                ordinal: chunk.ordinal,
                path: artifact.to_path_buf(),
                total,
                expected: chunk.len(),
            });
        }
        warn!(
            "chunk {}: {} has {} read ids, expected {}; keeping it",
            chunk.ordinal,
            artifact.display(),
            total,
            chunk.len()
        );
    }
    chunk.status = ChunkStatus::Verified;
    Ok(())
}
