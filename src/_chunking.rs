//! Module for deduplicating read ids and partitioning them into chunks.
//!
//! This module provides the shared pieces of the chunking pipeline: counting
//! read id occurrences in a single streaming pass, filtering the counts down
//! to singleton ids (and a report of the duplicated ones), and partitioning
//! the singleton list into bounded-size chunks for extraction.
//!
//! # Types
//!
//! - [`Chunk`]: one bounded slice of the singleton list, with an ordinal,
//!   a deterministic artifact name and a materialization status.
//! - [`ChunkStatus`]: `Pending → Extracting → {Verified | Failed}`.
//! - [`ChunkError`] / [`StoreError`]: the run-level and store-level error
//!   taxonomies.
//!
//! # Functions
//!
//! - [`count_ids`]: stream of read ids → occurrence counts.
//! - [`singletons`]: occurrence counts → sorted singleton ids + duplicate
//!   report.
//! - [`partition`]: singleton count + batch size → ordered chunks.
//!
use fnv::FnvHashMap;
use std::io;
use std::ops::Range;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for operations against a read id store (the `pod5` CLI in
/// production, an in-memory mock in tests).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed read id listing: {0}")]
    Listing(#[from] csv::Error),
    #[error("listing has no read_id column")]
    MissingIdColumn,
    #[error("listing contained a non-UTF-8 read id")]
    InvalidId,
    #[error("{tool} exited with {status}: {stderr}")]
    Process {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("extraction reported success but {0} was not created")]
    MissingOutput(PathBuf),
}

/// Error type for a chunking run. Config and List errors are fatal at
/// startup; the per-chunk variants abort the run at that chunk, leaving
/// already-verified artifacts in place for a restart.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("could not list read ids from source: {0}")]
    List(#[source] StoreError),
    #[error("chunk {ordinal}: extraction failed: {source}")]
    Extraction {
        ordinal: usize,
        #[source]
        source: StoreError,
    },
    #[error("chunk {ordinal}: could not read back {path}: {source}")]
    Unreadable {
        ordinal: usize,
        path: PathBuf,
        #[source]
        source: StoreError,
    },
    #[error(
        "chunk {ordinal}: {path} contains duplicated read ids ({unique} unique of {total}); \
         delete it and re-run to retry this chunk"
    )]
    DuplicateIds {
        ordinal: usize,
        path: PathBuf,
        total: usize,
        unique: usize,
    },
    #[error("chunk {ordinal}: {path} has {total} read ids, expected {expected}")]
    CountMismatch {
        ordinal: usize,
        path: PathBuf,
        total: usize,
        expected: usize,
    },
    #[error("could not write duplicate report: {0}")]
    Report(#[from] csv::Error),
}

/// Materialization state of a chunk. There is no transition out of
/// `Verified` or `Failed` within a run; deleting the artifact on disk is
/// the external reset that makes a chunk `Pending` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Extracting,
    Verified,
    Failed,
}

/// One bounded slice of the singleton id list, slated for a single
/// extraction into its own POD5 file.
#[derive(Debug)]
pub struct Chunk {
    pub ordinal: usize,
    pub range: Range<usize>,
    pub status: ChunkStatus,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Deterministic artifact name: `<prefix>_chunk<NNN>.pod5` with the
    /// ordinal zero-padded to three digits.
    pub fn file_name(&self, prefix: &str) -> String {
        format!("{}_chunk{:03}.pod5", prefix, self.ordinal)
    }

    /// The chunk's ids, as a slice of the singleton list it was cut from.
    pub fn ids<'a>(&self, singleton_ids: &'a [String]) -> &'a [String] {
        &singleton_ids[self.range.clone()]
    }
}

/// Count read id occurrences in a single pass over the listing stream.
///
/// The stream is never buffered in full; memory use is proportional to the
/// number of distinct ids. An empty stream yields an empty table.
///
/// # Arguments
///
/// * `ids` - The id listing, as produced by [`crate::store::ReadIdStore::list_ids`].
///
/// # Returns
///
/// Returns a map from read id to occurrence count, or the first listing
/// error encountered.
pub fn count_ids<I>(ids: I) -> Result<FnvHashMap<String, u64>, StoreError>
where
    I: Iterator<Item = Result<String, StoreError>>,
{
    let mut counts: FnvHashMap<String, u64> = FnvHashMap::default();
    for id in ids {
        *counts.entry(id?).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Split an occurrence table into the sorted singleton id list and the
/// duplicate report (id → count, count > 1 only).
///
/// Sorting lexicographically makes the downstream partition deterministic
/// for a given source file.
pub fn singletons(counts: &FnvHashMap<String, u64>) -> (Vec<String>, FnvHashMap<String, u64>) {
    let mut singleton_ids = Vec::new();
    let mut duplicates = FnvHashMap::default();
    for (id, &count) in counts {
        if count == 1 {
            singleton_ids.push(id.clone());
        } else {
            duplicates.insert(id.clone(), count);
        }
    }
    singleton_ids.sort_unstable();
    (singleton_ids, duplicates)
}

/// Partition `n_singletons` ids into chunks of at most `batch_size`.
///
/// Chunk *i* covers `[i*batch_size, min((i+1)*batch_size, n))`; the last
/// chunk may be smaller. Zero singletons yields zero chunks.
///
/// # Errors
///
/// `batch_size == 0` is a [`ChunkError::Config`].
pub fn partition(n_singletons: usize, batch_size: usize) -> Result<Vec<Chunk>, ChunkError> {
    if batch_size == 0 {
        return Err(ChunkError::Config(
            "batch size must be greater than zero".to_owned(),
        ));
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < n_singletons {
        let end = (start + batch_size).min(n_singletons);
        chunks.push(Chunk {
            ordinal: chunks.len(),
            range: start..end,
            status: ChunkStatus::Pending,
        });
        start = end;
    }
    Ok(chunks)
}

/// Write the duplicate report as a two-column TSV (read_id, count),
/// sorted by read id.
pub fn write_duplicates<W: io::Write>(
    duplicates: &FnvHashMap<String, u64>,
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    wtr.write_record(["read_id", "count"])?;
    let mut ids: Vec<&String> = duplicates.keys().collect();
    ids.sort_unstable();
    for id in ids {
        wtr.write_record([id.as_str(), &duplicates[id].to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_ids<'a>(ids: &'a [&'a str]) -> impl Iterator<Item = Result<String, StoreError>> + 'a {
        ids.iter().map(|id| Ok(id.to_string()))
    }

    #[test]
    fn test_count_ids() {
        let counts = count_ids(ok_ids(&["A", "B", "A", "C"])).unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["A"], 2);
        assert_eq!(counts["B"], 1);
        assert_eq!(counts["C"], 1);
    }

    #[test]
    fn test_count_ids_empty() {
        let counts = count_ids(ok_ids(&[])).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn test_count_ids_propagates_stream_error() {
        let ids = vec![
            Ok("A".to_string()),
            Err(StoreError::MissingIdColumn),
            Ok("B".to_string()),
        ];
        assert!(count_ids(ids.into_iter()).is_err());
    }

    #[test]
    fn test_singletons_and_duplicates() {
        let counts = count_ids(ok_ids(&["A", "B", "A", "C"])).unwrap();
        let (singleton_ids, duplicates) = singletons(&counts);
        assert_eq!(singleton_ids, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates["A"], 2);
    }

    #[test]
    fn test_singleton_and_duplicate_totals_account_for_input() {
        let input = ["r1", "r2", "r2", "r3", "r2", "r4", "r5", "r5"];
        let counts = count_ids(ok_ids(&input)).unwrap();
        let (singleton_ids, duplicates) = singletons(&counts);
        let duplicate_occurrences: u64 = duplicates.values().sum();
        assert_eq!(
            singleton_ids.len() as u64 + duplicate_occurrences,
            input.len() as u64
        );
    }

    #[test]
    fn test_partition_sizes() {
        let chunks = partition(2500, 1000).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[test]
    fn test_partition_is_contiguous_and_complete() {
        let n = 12345;
        let chunks = partition(n, 1000).unwrap();
        let mut expected_start = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert_eq!(chunk.range.start, expected_start);
            assert_eq!(chunk.status, ChunkStatus::Pending);
            expected_start = chunk.range.end;
        }
        assert_eq!(expected_start, n);
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, n);
    }

    #[test]
    fn test_partition_concatenation_reproduces_singletons() {
        let counts = count_ids(ok_ids(&["d", "b", "e", "a", "c"])).unwrap();
        let (singleton_ids, _) = singletons(&counts);
        let chunks = partition(singleton_ids.len(), 2).unwrap();
        let rebuilt: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.ids(&singleton_ids).iter().cloned())
            .collect();
        assert_eq!(rebuilt, singleton_ids);
    }

    #[test]
    fn test_partition_exact_multiple() {
        let chunks = partition(2000, 1000).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 1000);
    }

    #[test]
    fn test_partition_empty() {
        let chunks = partition(0, 1000).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_partition_zero_batch_size() {
        match partition(10, 0) {
            Err(ChunkError::Config(_)) => {}
            other => panic!("expected ConfigError, got {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn test_write_duplicates_sorted_tsv() {
        let counts = count_ids(ok_ids(&["b", "a", "b", "a", "c", "a"])).unwrap();
        let (_, duplicates) = singletons(&counts);
        let mut out = Vec::new();
        write_duplicates(&duplicates, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "read_id\tcount\na\t3\nb\t2\n");
    }

    #[test]
    fn test_chunk_file_name() {
        let chunk = Chunk {
            ordinal: 7,
            range: 0..10,
            status: ChunkStatus::Pending,
        };
        assert_eq!(chunk.file_name("sample"), "sample_chunk007.pod5");
    }
}
