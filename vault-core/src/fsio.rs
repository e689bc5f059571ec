//! Filesystem helpers: bounded retries, metadata reads, export copies.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bounded retry policy for filesystem calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
}

/// Errors worth another attempt: the file may be locked or the call interrupted.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy
    )
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
/// Backoff grows linearly with the attempt number.
pub fn retry_io<T>(policy: RetryPolicy, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < policy.attempts => {
                tracing::debug!(attempt, error = %err, "transient IO failure, retrying");
                thread::sleep(policy.backoff * attempt);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Size and modification time of a regular file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size_bytes: u64,
    /// Nanoseconds since the Unix epoch (negative before it)
    pub modified_at: i64,
}

pub fn file_meta(path: &Path, policy: RetryPolicy) -> io::Result<FileMeta> {
    let meta = retry_io(policy, || fs::metadata(path))?;
    let modified = meta.modified()?;
    Ok(FileMeta {
        size_bytes: meta.len(),
        modified_at: system_time_nanos(modified),
    })
}

pub(crate) fn system_time_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

/// Candidate file name for the `n`-th collision: `stem_n.ext`
fn disambiguated_name(file_name: &str, n: usize) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{file_name}_{n}"),
    }
}

/// Atomically claim a destination path in `dir` for `file_name`.
/// Existing files are never overwritten; collisions get a numeric suffix.
pub(crate) fn reserve_destination(dir: &Path, file_name: &str) -> io::Result<(PathBuf, File)> {
    let mut n = 0;
    loop {
        let candidate = dir.join(disambiguated_name(file_name, n));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Copy `source` into the reserved `dest` file, then carry over the
/// source's permissions and modification time. Opening the source is
/// retried under `policy`.
pub(crate) fn copy_into(
    source: &Path,
    dest_path: &Path,
    dest: File,
    policy: RetryPolicy,
) -> io::Result<u64> {
    copy_opened(|| File::open(source), dest_path, dest, policy)
}

fn copy_opened(
    open_source: impl FnMut() -> io::Result<File>,
    dest_path: &Path,
    mut dest: File,
    policy: RetryPolicy,
) -> io::Result<u64> {
    let result = (|| -> io::Result<u64> {
        let mut src = retry_io(policy, open_source)?;
        let src_meta = src.metadata()?;
        let copied = io::copy(&mut src, &mut dest)?;
        dest.set_permissions(src_meta.permissions())?;
        dest.set_modified(src_meta.modified()?)?;
        dest.sync_all()?;
        Ok(copied)
    })();

    if result.is_err() {
        // Don't leave a half-written file holding the reserved name
        drop(dest);
        let _ = fs::remove_file(dest_path);
    }
    result
}
