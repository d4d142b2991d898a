//! Keystone State Management
//!
//! Persists the final snapshot of a run so a later `destroy` can find and tear
//! down what the run left behind.
//!
//! # Overview
//!
//! - **StateFile**: serial, lineage and the per-resource lifecycle records
//! - **StateBackend**: storage for state files, with locking
//! - **LockInfo**: which run holds the state and until when
//!
//! # Example
//!
//! ```ignore
//! use keystone_state::{LocalBackend, LockOperation, StateBackend, StateFile};
//!
//! let backend = LocalBackend::with_path("keystone.state.json".into());
//! let lock = backend.acquire_lock(LockOperation::Apply).await?;
//!
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! state.record(report.snapshot.clone());
//! backend.write_state(&state).await?;
//!
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendError, BackendResult, StateBackend};
pub use backends::LocalBackend;
pub use lock::{LockInfo, LockOperation};
pub use state::StateFile;
