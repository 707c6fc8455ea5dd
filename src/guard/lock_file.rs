//! Cross-process guard backed by lock files in a shared directory.

use super::{ConcurrencyGuard, GuardError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, warn};
use uuid::Uuid;

/// How long `refresh` and `release` wait for a busy lock mutex.
const MUTEX_WAIT: std::time::Duration = std::time::Duration::from_secs(2);
const MUTEX_POLL: std::time::Duration = std::time::Duration::from_millis(5);

/// A lock mutex is only held for a read and a write; older ones are leftovers.
const MUTEX_ABANDONED_SECS: u64 = 30;

/// Contents of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockInfo {
    migration_id: String,
    /// Owning process, reported when a lock is taken over or lost.
    pid: u32,
    token: Uuid,
    acquired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refreshed_at: Option<DateTime<Utc>>,
}

impl LockInfo {
    fn last_seen(&self) -> DateTime<Utc> {
        self.refreshed_at.unwrap_or(self.acquired_at)
    }
}

/// What an existing lock file looks like to a contender.
enum LockState {
    Missing,
    Live,
    /// Not refreshed within `stale_after`. `None` when the contents are unreadable.
    Stale(Option<LockInfo>),
}

/// Guard shared by every process that can see the same lock directory.
///
/// Acquisition creates `<dir>/<sha256(identity)>.lock` with create-new
/// semantics, which the filesystem performs atomically. The holder refreshes
/// the lock between batches; a lock not refreshed within `stale_after` is
/// assumed to belong to a crashed process and may be taken over. Takeover,
/// refresh and release of one lock are serialised through a sibling
/// `.mutex` file, so a lock is only ever removed by someone who has just
/// seen its current contents.
#[derive(Debug)]
pub struct LockFileGuard {
    dir: PathBuf,
    stale_after: Option<Duration>,
    /// Tokens of the locks held through this instance.
    held: Mutex<HashMap<String, Uuid>>,
}

impl LockFileGuard {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stale_after: None,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Allow takeover of locks not refreshed for `stale_after`.
    ///
    /// Must be longer than the slowest batch of any migration guarded here,
    /// since the holder only refreshes between batches.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the lock file for a migration identity.
    pub fn lock_path(&self, migration_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(migration_id.as_bytes());
        self.dir
            .join(format!("{}.lock", hex::encode(hasher.finalize())))
    }

    fn inspect(&self, path: &Path) -> Result<LockState, GuardError> {
        let (info, last_seen) = match read_lock(path) {
            Ok(Some(info)) => {
                let last_seen = info.last_seen();
                (Some(info), last_seen)
            }
            // Unreadable contents: fall back to the file's modification time
            Ok(None) => match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => (None, DateTime::<Utc>::from(modified)),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LockState::Missing),
                Err(e) => return Err(e.into()),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LockState::Missing),
            Err(e) => return Err(e.into()),
        };

        match self.stale_after {
            Some(stale_after) if Utc::now() - last_seen > stale_after => {
                Ok(LockState::Stale(info))
            }
            _ => Ok(LockState::Live),
        }
    }

    /// Replace a stale lock with ours. Returns `false` if someone else won.
    fn take_over(
        &self,
        migration_id: &str,
        path: &Path,
        content: &[u8],
    ) -> Result<bool, GuardError> {
        let Some(_mutex) = LockMutex::try_acquire(path)? else {
            return Ok(false);
        };

        // Look again: the owner may have refreshed, or another contender
        // may have replaced the lock since it was first seen
        match self.inspect(path)? {
            LockState::Live => return Ok(false),
            LockState::Missing => {}
            LockState::Stale(owner) => {
                warn!(
                    migration = %migration_id,
                    path = %path.display(),
                    owner_pid = ?owner.as_ref().map(|o| o.pid),
                    last_seen = ?owner.as_ref().map(LockInfo::last_seen),
                    "Taking over stale migration lock"
                );
                remove_if_present(path)?;
            }
        }

        match create_lock(path, content) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn held(&self) -> std::sync::MutexGuard<'_, HashMap<String, Uuid>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lost(&self, migration_id: &str, owner: Option<&LockInfo>) -> GuardError {
        self.held().remove(migration_id);
        warn!(
            migration = %migration_id,
            owner_pid = ?owner.map(|o| o.pid),
            "Migration lock was taken over"
        );
        GuardError::LeaseLost(migration_id.to_string())
    }
}

impl ConcurrencyGuard for LockFileGuard {
    fn try_acquire(&self, migration_id: &str) -> Result<bool, GuardError> {
        fs::create_dir_all(&self.dir)?;

        let path = self.lock_path(migration_id);
        let info = LockInfo {
            migration_id: migration_id.to_string(),
            pid: std::process::id(),
            token: Uuid::new_v4(),
            acquired_at: Utc::now(),
            refreshed_at: None,
        };
        let content = serde_json::to_vec_pretty(&info)?;

        match create_lock(&path, &content) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if self.stale_after.is_none()
                    || !self.take_over(migration_id, &path, &content)?
                {
                    return Ok(false);
                }
            }
            Err(e) => return Err(e.into()),
        }

        debug!(migration = %migration_id, path = %path.display(), "Acquired migration lock");
        self.held().insert(migration_id.to_string(), info.token);
        Ok(true)
    }

    fn release(&self, migration_id: &str) -> Result<(), GuardError> {
        let Some(token) = self.held().remove(migration_id) else {
            return Ok(());
        };

        let path = self.lock_path(migration_id);
        let _mutex = LockMutex::acquire(&path)?;
        match read_lock(&path) {
            Ok(Some(info)) if info.token == token => Ok(remove_if_present(&path)?),
            Ok(owner) => {
                warn!(
                    migration = %migration_id,
                    owner_pid = ?owner.map(|o| o.pid),
                    "Migration lock was taken over; leaving it in place"
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn refresh(&self, migration_id: &str) -> Result<(), GuardError> {
        let Some(token) = self.held().get(migration_id).copied() else {
            return Err(GuardError::LeaseLost(migration_id.to_string()));
        };

        let path = self.lock_path(migration_id);
        let _mutex = LockMutex::acquire(&path)?;
        match read_lock(&path) {
            Ok(Some(mut info)) if info.token == token => {
                info.refreshed_at = Some(Utc::now());
                write_replacing(&path, &serde_json::to_vec_pretty(&info)?)?;
                Ok(())
            }
            Ok(owner) => Err(self.lost(migration_id, owner.as_ref())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.lost(migration_id, None)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Exclusive right to modify or remove one lock file. Removed on drop.
struct LockMutex {
    path: PathBuf,
}

impl LockMutex {
    fn path_for(lock: &Path) -> PathBuf {
        lock.with_extension("mutex")
    }

    /// Take the mutex if it is free right now.
    fn try_acquire(lock: &Path) -> std::io::Result<Option<Self>> {
        let path = Self::path_for(lock);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Some(Self { path })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                clear_abandoned(&path)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait up to `MUTEX_WAIT` for the mutex.
    fn acquire(lock: &Path) -> std::io::Result<Self> {
        let started = std::time::Instant::now();
        loop {
            if let Some(mutex) = Self::try_acquire(lock)? {
                return Ok(mutex);
            }
            if started.elapsed() >= MUTEX_WAIT {
                return Err(std::io::Error::new(
                    ErrorKind::WouldBlock,
                    format!("lock mutex {} is busy", Self::path_for(lock).display()),
                ));
            }
            thread::sleep(MUTEX_POLL);
        }
    }
}

impl Drop for LockMutex {
    fn drop(&mut self) {
        if let Err(e) = remove_if_present(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove lock mutex");
        }
    }
}

/// Remove a mutex file left behind by a process that died while holding it.
fn clear_abandoned(path: &Path) -> std::io::Result<()> {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let age = modified.elapsed().unwrap_or_default();
    if age.as_secs() >= MUTEX_ABANDONED_SECS {
        warn!(path = %path.display(), "Removing abandoned lock mutex");
        remove_if_present(path)?;
    }
    Ok(())
}

/// Create the lock file, failing with `AlreadyExists` if it is present.
fn create_lock(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(e) = file.write_all(content).and_then(|()| file.sync_all()) {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

/// Overwrite a lock file through a temp file and rename.
fn write_replacing(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension("lock.tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Read a lock file. `Ok(None)` means it exists but could not be parsed.
fn read_lock(path: &Path) -> std::io::Result<Option<LockInfo>> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content).ok())
}
