//! Local file backend for state storage
//!
//! State lives in a JSON file (default: keystone.state.json) with a sibling
//! `.lock` file holding the current `LockInfo`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::backend::{BackendError, BackendResult, StateBackend};
use crate::lock::{LockInfo, LockOperation};
use crate::state::StateFile;

/// Rounds of create / take over before giving up on a contended lock
const LOCK_ATTEMPTS: usize = 3;

pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    pub const DEFAULT_STATE_FILE: &'static str = "keystone.state.json";

    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    async fn read_lock(&self) -> BackendResult<Option<String>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Io(format!("Failed to read lock file: {}", e))),
        }
    }

    /// Create the lock file; fails with `AlreadyExists` while any lock file is present
    async fn create_lock_file(&self, content: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await
    }

    /// Remove an expired lock without ever deleting a lock someone else just created
    ///
    /// The file is first renamed aside, which only one contender can do. If what
    /// was moved is not the expired lock, it is linked back into place.
    async fn remove_expired_lock(&self, expired: &LockInfo) -> BackendResult<()> {
        let aside = self
            .lock_path
            .with_extension(format!("lock.{}", uuid::Uuid::new_v4().simple()));
        match fs::rename(&self.lock_path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BackendError::Io(format!("Failed to move lock file: {}", e))),
        }

        let moved = fs::read_to_string(&aside)
            .await
            .ok()
            .and_then(|content| LockInfo::parse(&content));
        let restore = match moved {
            Some(lock) if lock.id == expired.id => {
                warn!(
                    "Taking over expired {} lock {} held by {}",
                    expired.operation, expired.id, expired.who
                );
                Ok(())
            }
            _ => fs::hard_link(&aside, &self.lock_path).await,
        };

        if let Err(e) = fs::remove_file(&aside).await {
            warn!("Failed to remove {}: {}", aside.display(), e);
        }
        restore.map_err(|e| BackendError::Io(format!("Failed to restore lock file: {}", e)))
    }

    async fn remove_lock(&self) -> BackendResult<()> {
        fs::remove_file(&self.lock_path)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to remove lock file: {}", e)))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BackendError::Io(format!(
                    "Failed to read state file: {}",
                    e
                )));
            }
        };

        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            BackendError::InvalidState(format!("Failed to parse state file: {}", e))
        })?;

        if state.version > StateFile::CURRENT_VERSION {
            return Err(BackendError::InvalidState(format!(
                "State file version {} is newer than supported version {}",
                state.version,
                StateFile::CURRENT_VERSION
            )));
        }

        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(existing) = self.read_state().await?
            && existing.lineage != state.lineage
        {
            return Err(BackendError::LineageMismatch {
                expected: existing.lineage,
                actual: state.lineage.clone(),
            });
        }

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            BackendError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        fs::write(&self.state_path, content)
            .await
            .map_err(|e| BackendError::Io(format!("Failed to write state file: {}", e)))?;

        debug!(
            "Wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: LockOperation) -> BackendResult<LockInfo> {
        let lock = LockInfo::new(operation);
        let content = serde_json::to_vec_pretty(&lock)
            .map_err(|e| BackendError::Serialization(format!("Failed to serialize lock: {}", e)))?;

        for _ in 0..LOCK_ATTEMPTS {
            match self.create_lock_file(&content).await {
                Ok(()) => {
                    debug!("Acquired {} lock {}", operation, lock.id);
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(BackendError::Io(format!("Failed to create lock file: {}", e)));
                }
            }

            let Some(existing) = self.read_lock().await? else {
                continue;
            };
            match LockInfo::parse(&existing) {
                Some(held) if !held.is_expired() => return Err(BackendError::locked(&held)),
                Some(expired) => self.remove_expired_lock(&expired).await?,
                None => {
                    return Err(BackendError::LockUnreadable(
                        self.lock_path.display().to_string(),
                    ));
                }
            }
        }

        match self.read_lock().await?.as_deref().and_then(LockInfo::parse) {
            Some(held) => Err(BackendError::locked(&held)),
            None => Err(BackendError::LockUnreadable(
                self.lock_path.display().to_string(),
            )),
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let content = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;

        let existing = LockInfo::parse(&content)
            .ok_or_else(|| BackendError::LockUnreadable(self.lock_path.display().to_string()))?;

        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }

        self.remove_lock().await
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        let content = self
            .read_lock()
            .await?
            .ok_or_else(|| BackendError::LockNotFound(lock_id.to_string()))?;

        if let Some(existing) = LockInfo::parse(&content)
            && existing.id != lock_id
        {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }

        self.remove_lock().await
    }

    async fn init(&self) -> BackendResult<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::Io(format!("Failed to create state directory: {}", e)))?;
        }
        Ok(())
    }
}
