//! Module for reporting duplicated read ids in a POD5 file.
//!
//! The `dup-report` subcommand runs the same counting pass as `chunk-pod5`
//! but stops after the singleton filter: it writes the duplicate report
//! (read id, occurrence count) as TSV to stdout or a file, without
//! extracting anything.

use crate::_chunking::{count_ids, singletons, write_duplicates, ChunkError};
use crate::store::{Pod5Store, ReadIdStore};
use log::info;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub fn run(
    input_pod5: PathBuf,
    output: Option<PathBuf>,
    pod5_bin: String,
) -> Result<(), ChunkError> {
    // No extraction happens here; the timeout is unused but the store
    // constructor wants one.
    let store = Pod5Store::new(pod5_bin, Duration::from_secs(600));

    let listing = store.list_ids(&input_pod5).map_err(ChunkError::List)?;
    let counts = count_ids(listing).map_err(ChunkError::List)?;
    let (singleton_ids, duplicates) = singletons(&counts);
    info!(
        "{} distinct read ids, {} singletons, {} duplicated",
        counts.len(),
        singleton_ids.len(),
        duplicates.len()
    );

    match output {
        Some(path) => write_duplicates(&duplicates, File::create(path)?)?,
        None => write_duplicates(&duplicates, io::stdout().lock())?,
    }
    Ok(())
}
