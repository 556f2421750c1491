//! Access to a POD5 read store through the external `pod5` CLI.
//!
//! The chunking pipeline only needs two capabilities from the store: list
//! every read id it contains, and extract a given set of read ids into a
//! new file. [`ReadIdStore`] captures that seam; [`Pod5Store`] is the
//! production implementation, shelling out to `pod5 view` and
//! `pod5 filter`.

use crate::_chunking::StoreError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// The capabilities the chunking pipeline consumes from a read store.
pub trait ReadIdStore {
    /// Stream every read id in `file`, one per record, in store order.
    fn list_ids(
        &self,
        file: &Path,
    ) -> Result<Box<dyn Iterator<Item = Result<String, StoreError>> + '_>, StoreError>;

    /// Extract the given read ids from `source` into a new store file at
    /// `dest`. Blocks until the extraction finishes or times out.
    fn extract(&self, source: &Path, ids: &[String], dest: &Path) -> Result<(), StoreError>;
}

/// Store backed by the `pod5` command line tool.
pub struct Pod5Store {
    bin: String,
    timeout: Duration,
}

impl Pod5Store {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Pod5Store {
            bin: bin.into(),
            timeout,
        }
    }
}

/// Find the read_id column in a listing header.
fn get_key_col(headers: &csv::ByteRecord) -> Result<usize, StoreError> {
    for (i, field) in headers.iter().enumerate() {
        if field == b"read_id" {
            return Ok(i);
        }
    }
    Err(StoreError::MissingIdColumn)
}

/// Streaming iterator over the TSV output of `pod5 view`. Reaps the child
/// process at end of stream and surfaces a non-zero exit as an error.
struct IdStream {
    tool: String,
    child: Child,
    stderr: NamedTempFile,
    reader: csv::Reader<ChildStdout>,
    record: csv::ByteRecord,
    key_col: usize,
    done: bool,
}

impl Iterator for IdStream {
    type Item = Result<String, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => match std::str::from_utf8(&self.record[self.key_col]) {
                Ok(id) => Some(Ok(id.to_owned())),
                Err(_) => {
                    self.done = true;
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    Some(Err(StoreError::InvalidId))
                }
            },
            Ok(false) => {
                self.done = true;
                match self.child.wait() {
                    Ok(status) if status.success() => None,
                    Ok(status) => {
                        let stderr =
                            fs::read_to_string(self.stderr.path()).unwrap_or_default();
                        Some(Err(StoreError::Process {
                            tool: self.tool.clone(),
                            status: status.to_string(),
                            stderr: stderr.trim().to_owned(),
                        }))
                    }
                    Err(err) => Some(Err(StoreError::Io(err))),
                }
            }
            Err(err) => {
                self.done = true;
                let _ = self.child.kill();
                let _ = self.child.wait();
                Some(Err(StoreError::Listing(err)))
            }
        }
    }
}

impl Drop for IdStream {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

impl ReadIdStore for Pod5Store {
    fn list_ids(
        &self,
        file: &Path,
    ) -> Result<Box<dyn Iterator<Item = Result<String, StoreError>> + '_>, StoreError> {
        if !file.exists() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {}", file.display()),
            )));
        }
        let stderr = NamedTempFile::new()?;
        let mut child = Command::new(&self.bin)
            .arg("view")
            .arg(file)
            .arg("--include")
            .arg("read_id")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr.reopen()?))
            .spawn()?;
        // stdout is piped above, so take() always yields a handle
        let stdout = child.stdout.take().ok_or_else(|| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "child stdout was not captured",
            ))
        })?;
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(stdout);
        let key_col = match reader.byte_headers().map_err(StoreError::from).and_then(get_key_col) {
            Ok(col) => col,
            Err(err) => {
                // A failed pod5 invocation produces no header; prefer its
                // own diagnostics over a missing-column error.
                if let Some(status) = child.try_wait()? {
                    if !status.success() {
                        let stderr = fs::read_to_string(stderr.path()).unwrap_or_default();
                        return Err(StoreError::Process {
                            tool: format!("{} view", self.bin),
                            status: status.to_string(),
                            stderr: stderr.trim().to_owned(),
                        });
                    }
                }
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        Ok(Box::new(IdStream {
            tool: format!("{} view", self.bin),
            child,
            stderr,
            reader,
            record: csv::ByteRecord::new(),
            key_col,
            done: false,
        }))
    }

    fn extract(&self, source: &Path, ids: &[String], dest: &Path) -> Result<(), StoreError> {
        let scratch_dir = dest.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let mut id_file = tempfile::Builder::new()
            .prefix(".chunk_ids")
            .suffix(".txt")
            .tempfile_in(&scratch_dir)?;
        for id in ids {
            id_file.write_all(id.as_bytes())?;
            id_file.write_all(b"\n")?;
        }
        id_file.flush()?;

        let stderr = NamedTempFile::new()?;
        let mut child = Command::new(&self.bin)
            .arg("filter")
            .arg("--input")
            .arg(source)
            .arg("--ids")
            .arg(id_file.path())
            .arg("--output")
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr.reopen()?))
            .spawn()?;

        let status = wait_with_timeout(&mut child, self.timeout)?;
        if !status.success() {
            let stderr = fs::read_to_string(stderr.path()).unwrap_or_default();
            return Err(StoreError::Process {
                tool: format!("{} filter", self.bin),
                status: status.to_string(),
                stderr: stderr.trim().to_owned(),
            });
        }
        if !dest.exists() {
            return Err(StoreError::MissingOutput(dest.to_path_buf()));
        }
        Ok(())
    }
}

/// Poll the child until it exits or the deadline passes. On timeout the
/// child is killed and abandoned wholesale; there is no partial-result
/// recovery for a chunk.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> Result<std::process::ExitStatus, StoreError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(StoreError::Timeout(timeout.as_secs()));
        }
        thread::sleep(Duration::from_millis(200));
    }
}
