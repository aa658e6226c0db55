use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = "article-pipeline.lock";
pub const PID_FILE_NAME: &str = "article-pipeline.pid";

/// Exclusive ownership of a store directory; released on drop.
///
/// The concurrency limit and the claim step are process-local, so only one
/// process may drive a given store at a time.
#[must_use = "lock is released when StoreLock is dropped"]
pub struct StoreLock {
    file: fslock::LockFile,
    pid_path: PathBuf,
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("pid_path", &self.pid_path)
            .finish()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.pid_path) {
            warn!(path = %self.pid_path.display(), error = %e, "Failed to remove PID file");
        }
        if let Err(e) = self.file.unlock() {
            warn!(error = %e, "Failed to release store lock");
        }
    }
}

/// Contents of the PID file: the owning process and when it took the lock.
#[derive(Debug, Clone, PartialEq)]
struct Holder {
    pid: i32,
    since: Option<DateTime<Utc>>,
}

impl Holder {
    fn current() -> Self {
        Self {
            pid: std::process::id() as i32,
            since: Some(Utc::now()),
        }
    }

    /// First line is the PID, the optional second line an RFC 3339 timestamp.
    fn parse(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let since = lines
            .next()
            .and_then(|l| DateTime::parse_from_rfc3339(l.trim()).ok())
            .map(|t| t.with_timezone(&Utc));
        Some(Self { pid, since })
    }

    fn render(&self) -> String {
        match self.since {
            Some(since) => format!("{}\n{}\n", self.pid, since.to_rfc3339()),
            None => format!("{}\n", self.pid),
        }
    }

    fn describe(&self) -> String {
        match self.since {
            Some(since) => format!("PID {}, since {}", self.pid, since.to_rfc3339()),
            None => format!("PID {}", self.pid),
        }
    }
}

/// Take the store lock in `store_dir`, creating the directory if needed.
///
/// The OS file lock is the source of truth; the PID file only feeds error
/// messages when someone else holds it.
pub fn try_acquire(store_dir: &Path) -> Result<StoreLock, String> {
    fs::create_dir_all(store_dir)
        .map_err(|e| format!("Failed to create {}: {}", store_dir.display(), e))?;

    let lock_path = store_dir.join(LOCK_FILE_NAME);
    let pid_path = store_dir.join(PID_FILE_NAME);

    let mut file = fslock::LockFile::open(&lock_path)
        .map_err(|e| format!("Failed to open lock file {}: {}", lock_path.display(), e))?;

    let acquired = file
        .try_lock()
        .map_err(|e| format!("Failed to acquire store lock: {}", e))?;
    if !acquired {
        return Err(contention_message(&lock_path, &pid_path));
    }

    let holder = Holder::current();
    fs::write(&pid_path, holder.render())
        .map_err(|e| format!("Failed to write PID file {}: {}", pid_path.display(), e))?;
    debug!(dir = %store_dir.display(), pid = holder.pid, "Store lock acquired");

    Ok(StoreLock { file, pid_path })
}

fn contention_message(lock_path: &Path, pid_path: &Path) -> String {
    let holder = fs::read_to_string(pid_path)
        .ok()
        .and_then(|contents| Holder::parse(&contents));

    match holder {
        Some(holder) if is_pid_alive(holder.pid) => format!(
            "Another article-pipeline process is using this store ({})",
            holder.describe()
        ),
        Some(holder) => format!(
            "Store lock is held but recorded {} is not alive. Remove {} and {} to recover",
            holder.describe(),
            lock_path.display(),
            pid_path.display()
        ),
        None => format!(
            "Another article-pipeline process holds the store lock. If this is stale, remove {}",
            lock_path.display()
        ),
    }
}

fn is_pid_alive(pid: i32) -> bool {
    // signal 0 only checks that the process exists
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}
