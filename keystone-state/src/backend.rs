//! State backend trait and error types

use async_trait::async_trait;
use thiserror::Error;

use crate::lock::{LockInfo, LockOperation};
use crate::state::StateFile;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The state is locked by another run
    #[error(
        "State is locked by {who} for {operation} (lock ID: {lock_id}, expires in {minutes_remaining} min); \
         if that run is gone, use `keystone force-unlock {lock_id}`"
    )]
    Locked {
        lock_id: String,
        who: String,
        operation: LockOperation,
        minutes_remaining: i64,
    },

    /// A lock file exists but holds no complete lock
    #[error("Lock file {0} is being written or is corrupt; retry, or delete it once no run is active")]
    LockUnreadable(String),

    #[error("Lock not found: {0}")]
    LockNotFound(String),

    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    /// State file is corrupted or invalid
    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// Refuses to overwrite the state of a different deployment
    #[error("State lineage mismatch: expected {expected}, got {actual}")]
    LineageMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    pub fn locked(lock: &LockInfo) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation,
            minutes_remaining: lock.minutes_remaining(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Storage for state files, with locking for exclusive access
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Read the current state
    ///
    /// Returns `None` if nothing has been written yet
    async fn read_state(&self) -> BackendResult<Option<StateFile>>;

    /// Write the state
    ///
    /// Fails with `LineageMismatch` when the stored state belongs to another
    /// deployment. Callers bump the serial (see `StateFile::record`) first.
    async fn write_state(&self, state: &StateFile) -> BackendResult<()>;

    /// Acquire the lock for an operation
    ///
    /// At most one caller holds the lock at a time; an expired lock is taken over.
    async fn acquire_lock(&self, operation: LockOperation) -> BackendResult<LockInfo>;

    /// Release a lock previously returned by `acquire_lock`
    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()>;

    /// Remove a lock by ID regardless of who holds it
    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()>;

    /// Prepare the storage location
    async fn init(&self) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_error_points_at_force_unlock() {
        let lock = LockInfo::new(LockOperation::Apply);
        let error = BackendError::locked(&lock);

        match &error {
            BackendError::Locked {
                lock_id,
                operation,
                ..
            } => {
                assert_eq!(lock_id, &lock.id);
                assert_eq!(*operation, LockOperation::Apply);
            }
            other => panic!("Expected Locked error, got {:?}", other),
        }
        assert!(
            error
                .to_string()
                .contains(&format!("keystone force-unlock {}", lock.id))
        );
    }

    #[test]
    fn lineage_error_display() {
        let error = BackendError::LineageMismatch {
            expected: "a".to_string(),
            actual: "b".to_string(),
        };
        assert_eq!(error.to_string(), "State lineage mismatch: expected a, got b");
    }
}
